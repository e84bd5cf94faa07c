//! Run summaries printed as JSON at the end of a run

use super::stage::Stage;
use crate::error::OrchestratorError;
use crate::types::{Address, ConfirmationResult, ConfirmationStatus, OperationKind, TxHash, UnsignedTransaction};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// One packed transaction and what became of it
#[derive(Debug, Clone, Serialize)]
pub struct TransactionReport {
    pub sender: Address,
    pub receiver: Address,
    pub nonce: u64,
    pub kind: OperationKind,
    pub op_count: usize,
    /// Decimal base units
    pub value: String,
    pub gas_limit: u64,
    pub tx_hash: Option<TxHash>,
    pub status: Option<ConfirmationStatus>,
    pub chain_status: Option<String>,
    pub elapsed_ms: Option<u64>,
}

impl From<&UnsignedTransaction> for TransactionReport {
    fn from(tx: &UnsignedTransaction) -> Self {
        Self {
            sender: tx.sender.clone(),
            receiver: tx.receiver.clone(),
            nonce: tx.nonce,
            kind: tx.kind,
            op_count: tx.op_count,
            value: tx.value.to_string(),
            gas_limit: tx.gas_limit,
            tx_hash: None,
            status: None,
            chain_status: None,
            elapsed_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub transactions: Vec<TransactionReport>,
    #[serde(skip)]
    pub confirmations: Vec<ConfirmationResult>,
}

impl StageReport {
    pub fn new(stage: Stage, transactions: &[UnsignedTransaction]) -> Self {
        Self {
            stage,
            started_at: Utc::now(),
            finished_at: None,
            transactions: transactions.iter().map(TransactionReport::from).collect(),
            confirmations: Vec::new(),
        }
    }

    pub fn record_hashes(&mut self, hashes: &[TxHash]) {
        for (tx, hash) in self.transactions.iter_mut().zip(hashes) {
            tx.tx_hash = Some(hash.clone());
        }
    }

    /// Attach confirmation results, matched to transactions by hash
    pub fn record_confirmations(&mut self, results: Vec<ConfirmationResult>) {
        for result in &results {
            if let Some(tx) = self
                .transactions
                .iter_mut()
                .find(|tx| tx.tx_hash.as_ref() == Some(&result.tx_hash))
            {
                tx.status = Some(result.status);
                tx.chain_status = result.chain_status.clone();
                tx.elapsed_ms = Some(result.elapsed.as_millis() as u64);
            }
        }
        self.confirmations = results;
        self.finished_at = Some(Utc::now());
    }

    /// True only if every transaction of the stage confirmed successfully
    pub fn all_succeeded(&self) -> bool {
        self.confirmations.len() == self.transactions.len()
            && self.confirmations.iter().all(ConfirmationResult::is_success)
    }

    pub fn first_failure(&self) -> Option<&ConfirmationResult> {
        self.confirmations.iter().find(|r| !r.is_success())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Running,
    Completed,
    Halted { stage: Option<Stage>, error: String },
}

/// Everything that happened for one account
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    pub run_id: Uuid,
    pub account: Address,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageReport>,
    pub outcome: WorkflowOutcome,
}

impl WorkflowReport {
    pub fn new(run_id: Uuid, account: &Address) -> Self {
        Self {
            run_id,
            account: account.clone(),
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            outcome: WorkflowOutcome::Running,
        }
    }

    pub fn complete(&mut self) {
        self.outcome = WorkflowOutcome::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn halt(&mut self, stage: Option<Stage>, error: &OrchestratorError) {
        self.outcome = WorkflowOutcome::Halted {
            stage,
            error: error.to_string(),
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, WorkflowOutcome::Completed)
    }

    /// Transactions submitted across all stages
    pub fn submitted(&self) -> usize {
        self.stages
            .iter()
            .flat_map(|s| &s.transactions)
            .filter(|tx| tx.tx_hash.is_some())
            .count()
    }
}

/// Reports of every account in a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accounts: Vec<WorkflowReport>,
    /// Accounts never started because an earlier account halted the run
    pub skipped: Vec<Address>,
}

impl RunSummary {
    pub fn halted(&self) -> bool {
        !self.skipped.is_empty() || self.accounts.iter().any(|a| !a.is_completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tokens;
    use std::time::Duration;

    fn tx(nonce: u64) -> UnsignedTransaction {
        UnsignedTransaction {
            sender: Address::new("erd1owner"),
            receiver: Address::new("erd1validator"),
            nonce,
            value: tokens(2500),
            gas_limit: 56_000_000,
            gas_price: 1_000_000_000,
            data: b"stake@01@aa@bb".to_vec(),
            chain_id: "T".to_string(),
            version: 1,
            kind: OperationKind::StakeKey,
            op_count: 1,
        }
    }

    fn result(hash: &str, status: ConfirmationStatus) -> ConfirmationResult {
        ConfirmationResult {
            tx_hash: TxHash::new(hash),
            status,
            chain_status: Some(status.name().to_string()),
            elapsed: Duration::from_secs(12),
            polls: 2,
        }
    }

    #[test]
    fn test_stage_succeeds_only_when_every_tx_confirmed() {
        let mut report = StageReport::new(Stage::Stake, &[tx(0), tx(1)]);
        report.record_hashes(&[TxHash::new("h0"), TxHash::new("h1")]);

        // Waiting stopped after the first transaction
        report.record_confirmations(vec![result("h0", ConfirmationStatus::Success)]);
        assert!(!report.all_succeeded());
        assert!(report.first_failure().is_none());

        report.record_confirmations(vec![
            result("h0", ConfirmationStatus::Success),
            result("h1", ConfirmationStatus::Success),
        ]);
        assert!(report.all_succeeded());
        assert_eq!(report.transactions[1].elapsed_ms, Some(12_000));
    }

    #[test]
    fn test_halted_workflow_serializes_outcome() {
        let mut report = WorkflowReport::new(Uuid::new_v4(), &Address::new("erd1owner"));
        report.halt(Some(Stage::Fund), &OrchestratorError::Cancelled("fund stage".to_string()));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["status"], "halted");
        assert_eq!(json["outcome"]["stage"], "fund");
        assert!(!report.is_completed());
    }
}
