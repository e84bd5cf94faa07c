//! Chain module - the gateway boundary
//!
//! This module provides:
//! - The [`ChainClient`] trait every other component talks to
//! - A REST gateway implementation with read failover
//! - Confirmation polling for submitted transactions

pub mod finality;
pub mod provider;

pub use finality::ConfirmationWaiter;
pub use provider::GatewayProvider;

use crate::error::OrchestratorResult;
use crate::types::{AccountState, Address, NetworkParameters, SignedTransaction, TxHash, TxStatus};

use async_trait::async_trait;

/// Queries and submissions against the target chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current nonce and balance of an account
    async fn get_account(&self, address: &Address) -> OrchestratorResult<AccountState>;

    /// Chain id, minimum gas price and transaction version
    async fn get_network_parameters(&self) -> OrchestratorResult<NetworkParameters>;

    /// Submit signed transactions in one call.
    ///
    /// Returns one hash per transaction, in input order.
    async fn submit_batch(&self, txs: &[SignedTransaction]) -> OrchestratorResult<Vec<TxHash>>;

    /// Raw processing status of a submitted transaction
    async fn get_transaction_status(&self, tx_hash: &TxHash) -> OrchestratorResult<TxStatus>;
}
