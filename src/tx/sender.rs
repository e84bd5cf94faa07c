//! Transaction pipeline: sign, accumulate, submit as one batch

use crate::chain::ChainClient;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{Address, SignedTransaction, TxHash, UnsignedTransaction};
use crate::wallet::{Keyring, Signer};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Signs packed transactions and submits them in a single gateway call.
///
/// Every `(sender, nonce)` pair is submitted at most once for the lifetime
/// of the pipeline, even if the submission that carried it failed.
pub struct TransactionPipeline {
    client: Arc<dyn ChainClient>,
    keyring: Keyring,
    submit_timeout: Duration,
    /// Signed transactions waiting for the next submit
    buffer: Vec<SignedTransaction>,
    /// Nonces already handed to the gateway, per sender
    submitted: HashSet<(Address, u64)>,
}

impl TransactionPipeline {
    pub fn new(client: Arc<dyn ChainClient>, keyring: Keyring, submit_timeout: Duration) -> Self {
        Self {
            client,
            keyring,
            submit_timeout,
            buffer: Vec::new(),
            submitted: HashSet::new(),
        }
    }

    /// Sign with the keyring's signer for the transaction's sender
    pub fn sign(&self, tx: UnsignedTransaction) -> OrchestratorResult<SignedTransaction> {
        let signer = self.keyring.get(&tx.sender)?;
        sign_with(signer.as_ref(), tx)
    }

    /// Queue a signed transaction for the next submit
    pub fn push(&mut self, signed: SignedTransaction) -> OrchestratorResult<()> {
        let tx = signed.transaction();
        let key = (tx.sender.clone(), tx.nonce);

        let buffered = self
            .buffer
            .iter()
            .any(|b| b.transaction().sender == key.0 && b.transaction().nonce == key.1);
        if buffered || self.submitted.contains(&key) {
            return Err(OrchestratorError::Validation(format!(
                "Nonce {} of {} was already queued or submitted",
                key.1, key.0
            )));
        }

        debug!(
            "Queued {} tx from {} with nonce {} ({} ops, gas {})",
            tx.kind, tx.sender, tx.nonce, tx.op_count, tx.gas_limit
        );
        self.buffer.push(signed);
        Ok(())
    }

    /// Sign and queue transactions in order
    pub fn sign_and_push(&mut self, txs: Vec<UnsignedTransaction>) -> OrchestratorResult<usize> {
        let count = txs.len();
        for tx in txs {
            let signed = self.sign(tx)?;
            self.push(signed)?;
        }
        Ok(count)
    }

    /// Number of signed transactions waiting to be submitted
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop queued transactions without submitting them
    pub fn discard(&mut self) -> Vec<SignedTransaction> {
        std::mem::take(&mut self.buffer)
    }

    /// Submit the queued transactions as one batch.
    ///
    /// The buffer is cleared whether or not the call succeeds. Returns one
    /// hash per transaction in queue order.
    pub async fn submit(&mut self) -> OrchestratorResult<Vec<TxHash>> {
        let batch = std::mem::take(&mut self.buffer);
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        for signed in &batch {
            let tx = signed.transaction();
            self.submitted.insert((tx.sender.clone(), tx.nonce));
        }

        info!("Submitting batch of {} transactions", batch.len());

        let result = match timeout(self.submit_timeout, self.client.submit_batch(&batch)).await {
            Ok(Ok(hashes)) => Ok(hashes),
            Ok(Err(OrchestratorError::Submission(message))) => {
                Err(OrchestratorError::Submission(message))
            }
            Ok(Err(e)) => Err(OrchestratorError::Submission(e.to_string())),
            Err(_) => Err(OrchestratorError::Submission(format!(
                "Gateway did not answer within {:?}",
                self.submit_timeout
            ))),
        };

        let hashes = match result {
            Ok(hashes) => hashes,
            Err(e) => {
                error!("Batch submission failed: {}", e);
                for signed in &batch {
                    crate::metrics::record_submission_failure(signed.transaction().kind.name());
                }
                return Err(e);
            }
        };

        if hashes.len() != batch.len() {
            return Err(OrchestratorError::Submission(format!(
                "Gateway returned {} hashes for {} transactions",
                hashes.len(),
                batch.len()
            )));
        }

        for (signed, hash) in batch.iter().zip(&hashes) {
            let tx = signed.transaction();
            debug!("Submitted {} (nonce {}) as {}", tx.kind, tx.nonce, hash);
            crate::metrics::record_tx_submitted(tx.kind.name(), 1);
        }

        Ok(hashes)
    }
}

/// Sign a transaction with an explicit signer.
///
/// Fails if the signer's key does not belong to the declared sender.
pub fn sign_with(signer: &dyn Signer, tx: UnsignedTransaction) -> OrchestratorResult<SignedTransaction> {
    if signer.address() != &tx.sender {
        return Err(OrchestratorError::Signing {
            sender: tx.sender.to_string(),
            message: format!("Key belongs to {}", signer.address()),
        });
    }

    let payload = tx.signing_payload()?;
    let signature = signer.sign(&payload).map_err(|e| OrchestratorError::Signing {
        sender: tx.sender.to_string(),
        message: e.to_string(),
    })?;

    Ok(SignedTransaction::new(tx, signature))
}
