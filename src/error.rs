//! Error types for the stake orchestrator

use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Signing error for sender {sender}: {message}")]
    Signing { sender: String, message: String },

    #[error("Submission error: {0}")]
    Submission(String),

    #[error("Gateway connection error ({endpoint}): {message}")]
    ChainConnection { endpoint: String, message: String },

    #[error("Transaction {tx_hash} failed on chain with status {status}")]
    ChainFailure { tx_hash: String, status: String },

    #[error("Timeout waiting {waited_secs}s for transaction {tx_hash}")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },

    #[error("Keystore error: {0}")]
    Keystore(String),

    #[error("Run cancelled during {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Check if error is retryable.
    ///
    /// Only read-path connectivity errors qualify. Submission is never
    /// retried because a partially accepted batch would be sent twice.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::ChainConnection { .. })
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ChainFailure { .. }
                | OrchestratorError::ConfirmationTimeout { .. }
                | OrchestratorError::Signing { .. }
                | OrchestratorError::Submission(_)
        )
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        let conn = OrchestratorError::ChainConnection {
            endpoint: "http://127.0.0.1:7950".to_string(),
            message: "refused".to_string(),
        };
        assert!(conn.is_retryable());
        assert!(!OrchestratorError::Submission("rejected".to_string()).is_retryable());
        assert!(OrchestratorError::Submission("rejected".to_string()).should_alert());
        assert!(!OrchestratorError::Validation("empty".to_string()).should_alert());
    }
}
