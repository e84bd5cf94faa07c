//! Confirmation polling for submitted transactions
//!
//! The chain reports a processing status per transaction:
//! - `pending`: keep polling at the block interval
//! - `success`: terminal, confirmed
//! - anything else: terminal failure, never retried
//!
//! A transaction still pending when the deadline passes is reported as timed
//! out. Whether that is fatal is up to the caller.

use crate::cancel::CancelToken;
use crate::chain::ChainClient;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::types::{ConfirmationResult, ConfirmationStatus, TxHash, TxStatus};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Waits for transactions to reach a terminal status
pub struct ConfirmationWaiter {
    client: Arc<dyn ChainClient>,
    /// Delay between status queries, normally the block time
    poll_interval: Duration,
    /// Default deadline per transaction
    timeout: Duration,
    cancel: CancelToken,
}

impl ConfirmationWaiter {
    pub fn new(client: Arc<dyn ChainClient>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            client,
            poll_interval,
            timeout,
            cancel: CancelToken::never(),
        }
    }

    /// Abort polling when the token is cancelled
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for one transaction with the default deadline
    pub async fn await_tx(&self, tx_hash: &TxHash) -> OrchestratorResult<ConfirmationResult> {
        self.await_tx_with_timeout(tx_hash, self.timeout).await
    }

    /// Wait for one transaction until it is terminal or `timeout` elapses.
    ///
    /// Status query errors are returned as errors, not treated as pending.
    pub async fn await_tx_with_timeout(
        &self,
        tx_hash: &TxHash,
        timeout: Duration,
    ) -> OrchestratorResult<ConfirmationResult> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut polls = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled(format!(
                    "confirmation of {}",
                    tx_hash
                )));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            polls += 1;
            let status = match tokio::time::timeout(
                remaining,
                self.client.get_transaction_status(tx_hash),
            )
            .await
            {
                Ok(status) => status?,
                // Query outlived the deadline
                Err(_) => {
                    return Ok(self.finish(tx_hash, ConfirmationStatus::TimedOut, None, start, polls))
                }
            };

            match status {
                TxStatus::Success => {
                    return Ok(self.finish(tx_hash, ConfirmationStatus::Success, None, start, polls));
                }
                TxStatus::Other(chain_status) => {
                    return Ok(self.finish(
                        tx_hash,
                        ConfirmationStatus::Failed,
                        Some(chain_status),
                        start,
                        polls,
                    ));
                }
                TxStatus::Pending => {
                    debug!("Transaction {} pending (poll {})", tx_hash, polls);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(self.finish(
                    tx_hash,
                    ConfirmationStatus::TimedOut,
                    Some("pending".to_string()),
                    start,
                    polls,
                ));
            }

            let wait = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.cancel.cancelled() => {
                    return Err(OrchestratorError::Cancelled(format!(
                        "confirmation of {}",
                        tx_hash
                    )));
                }
            }
        }
    }

    /// Wait for transactions in order, stopping at the first non-success.
    ///
    /// The returned list ends with the failing result, if any; later
    /// transactions are not queried.
    pub async fn await_all(&self, tx_hashes: &[TxHash]) -> OrchestratorResult<Vec<ConfirmationResult>> {
        let mut results = Vec::with_capacity(tx_hashes.len());
        self.await_into(tx_hashes, &mut results).await?;
        Ok(results)
    }

    /// Like [`await_all`](Self::await_all), appending to `results`.
    ///
    /// On error `results` keeps every transaction that reached a terminal
    /// state before the interruption.
    pub async fn await_into(
        &self,
        tx_hashes: &[TxHash],
        results: &mut Vec<ConfirmationResult>,
    ) -> OrchestratorResult<()> {
        for tx_hash in tx_hashes {
            let result = self.await_tx(tx_hash).await?;
            let success = result.is_success();
            results.push(result);
            if !success {
                break;
            }
        }
        Ok(())
    }

    fn finish(
        &self,
        tx_hash: &TxHash,
        status: ConfirmationStatus,
        chain_status: Option<String>,
        start: Instant,
        polls: u32,
    ) -> ConfirmationResult {
        let elapsed = start.elapsed();

        match status {
            ConfirmationStatus::Success => {
                info!("Transaction {} confirmed after {:?}", tx_hash, elapsed)
            }
            ConfirmationStatus::Failed => warn!(
                "Transaction {} failed with status {:?}",
                tx_hash, chain_status
            ),
            ConfirmationStatus::TimedOut => {
                warn!("Transaction {} not confirmed within {:?}", tx_hash, elapsed)
            }
        }

        ConfirmationResult {
            tx_hash: tx_hash.clone(),
            status,
            chain_status,
            elapsed,
            polls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainClient;

    const BLOCK: Duration = Duration::from_secs(6);
    const TIMEOUT: Duration = Duration::from_secs(120);

    fn waiter(mock: MockChainClient) -> ConfirmationWaiter {
        ConfirmationWaiter::new(Arc::new(mock), BLOCK, TIMEOUT)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_pending_polls() {
        let mut mock = MockChainClient::new();
        let mut calls = 0;
        mock.expect_get_transaction_status()
            .times(3)
            .returning(move |_| {
                calls += 1;
                Ok(if calls < 3 {
                    TxStatus::Pending
                } else {
                    TxStatus::Success
                })
            });

        let result = waiter(mock).await_tx(&TxHash::new("aa")).await.unwrap();
        assert_eq!(result.status, ConfirmationStatus::Success);
        assert_eq!(result.polls, 3);
        assert!(result.elapsed >= Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_always_pending() {
        let mut mock = MockChainClient::new();
        mock.expect_get_transaction_status()
            .returning(|_| Ok(TxStatus::Pending));

        let result = waiter(mock).await_tx(&TxHash::new("aa")).await.unwrap();
        assert_eq!(result.status, ConfirmationStatus::TimedOut);
        // One poll at start, then one per block until the deadline
        assert_eq!(result.polls, 21);
        assert!(result.elapsed >= TIMEOUT);

        let error = result.into_error().unwrap();
        assert!(matches!(error, OrchestratorError::ConfirmationTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_status_is_terminal_failure() {
        let mut mock = MockChainClient::new();
        mock.expect_get_transaction_status()
            .times(1)
            .returning(|_| Ok(TxStatus::Other("fail".to_string())));

        let result = waiter(mock).await_tx(&TxHash::new("aa")).await.unwrap();
        assert_eq!(result.status, ConfirmationStatus::Failed);
        assert_eq!(result.chain_status.as_deref(), Some("fail"));
        assert_eq!(result.polls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_error_propagates() {
        let mut mock = MockChainClient::new();
        mock.expect_get_transaction_status().times(1).returning(|_| {
            Err(OrchestratorError::ChainConnection {
                endpoint: "http://gateway".to_string(),
                message: "refused".to_string(),
            })
        });

        let result = waiter(mock).await_tx(&TxHash::new("aa")).await;
        assert!(matches!(
            result,
            Err(OrchestratorError::ChainConnection { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_all_stops_at_first_failure() {
        let mut mock = MockChainClient::new();
        mock.expect_get_transaction_status()
            .withf(|hash| hash.as_str() == "aa")
            .times(1)
            .returning(|_| Ok(TxStatus::Success));
        mock.expect_get_transaction_status()
            .withf(|hash| hash.as_str() == "bb")
            .times(1)
            .returning(|_| Ok(TxStatus::Other("invalid".to_string())));

        let hashes = vec![TxHash::new("aa"), TxHash::new("bb"), TxHash::new("cc")];
        let results = waiter(mock).await_all(&hashes).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert_eq!(results[1].status, ConfirmationStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_into_keeps_results_before_error() {
        let mut mock = MockChainClient::new();
        mock.expect_get_transaction_status()
            .withf(|hash| hash.as_str() == "aa")
            .times(1)
            .returning(|_| Ok(TxStatus::Success));
        mock.expect_get_transaction_status()
            .withf(|hash| hash.as_str() == "bb")
            .times(1)
            .returning(|_| {
                Err(OrchestratorError::ChainConnection {
                    endpoint: "http://gateway".to_string(),
                    message: "refused".to_string(),
                })
            });

        let hashes = vec![TxHash::new("aa"), TxHash::new("bb")];
        let mut results = Vec::new();
        let waited = waiter(mock).await_into(&hashes, &mut results).await;
        assert!(matches!(
            waited,
            Err(OrchestratorError::ChainConnection { .. })
        ));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tx_hash, TxHash::new("aa"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_polling() {
        let mut mock = MockChainClient::new();
        mock.expect_get_transaction_status()
            .returning(|_| Ok(TxStatus::Pending));

        let (handle, token) = CancelToken::new();
        let waiter = waiter(mock).with_cancel(token);

        let task = tokio::spawn(async move { waiter.await_tx(&TxHash::new("aa")).await });
        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(OrchestratorError::Cancelled(_))));
    }
}
