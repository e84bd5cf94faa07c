//! Stake orchestrator - packs, signs, submits and confirms staking
//! transactions for many accounts
//!
//! Each account runs through ordered stages (fund, stake, finalize). Within a
//! stage, operations are packed into as few transactions as the gas and size
//! limits allow, nonces are drawn from a per-sender allocator, and the batch
//! is confirmed before the next stage may start.

pub mod cancel;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod metrics;
pub mod tx;
pub mod types;
pub mod wallet;

pub use error::{OrchestratorError, OrchestratorResult};
