//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transactions planned and submitted per operation kind
//! - Confirmation outcomes and latency
//! - Stage and workflow outcomes

use crate::error::{OrchestratorError, OrchestratorResult};

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{info, warn};

lazy_static! {
    // Transaction metrics
    pub static ref TX_PLANNED: CounterVec = register_counter_vec!(
        "stake_orchestrator_transactions_planned_total",
        "Total transactions packed",
        &["kind"]
    ).unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "stake_orchestrator_transactions_submitted_total",
        "Total transactions accepted by the gateway",
        &["kind"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "stake_orchestrator_transactions_confirmed_total",
        "Total transactions reaching a terminal state, by outcome",
        &["kind", "status"]
    ).unwrap();

    pub static ref TX_CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "stake_orchestrator_confirmation_latency_seconds",
        "Time from first status poll to terminal state",
        &["status"],
        vec![1.0, 6.0, 12.0, 18.0, 30.0, 60.0, 90.0, 120.0, 300.0]
    ).unwrap();

    pub static ref SUBMISSION_FAILURES: CounterVec = register_counter_vec!(
        "stake_orchestrator_submission_failures_total",
        "Total batch submissions rejected or unreachable",
        &["kind"]
    ).unwrap();

    // Workflow metrics
    pub static ref STAGES_COMPLETED: CounterVec = register_counter_vec!(
        "stake_orchestrator_stages_completed_total",
        "Total stages completed, by stage and outcome",
        &["stage", "outcome"]
    ).unwrap();

    pub static ref ACCOUNTS_IN_PROGRESS: GaugeVec = register_gauge_vec!(
        "stake_orchestrator_accounts_in_progress",
        "Accounts whose workflow is currently running",
        &[]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> OrchestratorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| OrchestratorError::Config(format!("Cannot bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    render()
}

/// Current metrics in Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

// Helper functions to record metrics

pub fn record_tx_planned(kind: &str, count: usize) {
    TX_PLANNED.with_label_values(&[kind]).inc_by(count as f64);
}

pub fn record_tx_submitted(kind: &str, count: usize) {
    TX_SUBMITTED.with_label_values(&[kind]).inc_by(count as f64);
}

pub fn record_submission_failure(kind: &str) {
    SUBMISSION_FAILURES.with_label_values(&[kind]).inc();
}

pub fn record_confirmation(kind: &str, status: &str, latency_secs: f64) {
    TX_CONFIRMED.with_label_values(&[kind, status]).inc();
    TX_CONFIRMATION_LATENCY
        .with_label_values(&[status])
        .observe(latency_secs);
}

pub fn record_stage(stage: &str, success: bool) {
    let outcome = if success { "success" } else { "halted" };
    STAGES_COMPLETED.with_label_values(&[stage, outcome]).inc();
}

pub fn record_account_started() {
    ACCOUNTS_IN_PROGRESS.with_label_values(&[]).inc();
}

pub fn record_account_finished() {
    ACCOUNTS_IN_PROGRESS.with_label_values(&[]).dec();
}
