//! Workflow sequencer: drives each account through its stages
//!
//! Every stage is one pack, sign, submit and confirm cycle. A stage starts
//! only after every transaction of the previous stage confirmed
//! successfully; any failure or timeout halts the account.

use super::report::{RunSummary, StageReport, WorkflowReport};
use super::stage::{AccountPlan, Stage, StageDescriptor};
use crate::cancel::CancelToken;
use crate::chain::{ChainClient, ConfirmationWaiter};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::tx::{BatchPacker, NonceBook, TransactionPipeline};
use crate::types::{Address, ConfirmationResult, UnsignedTransaction};
use crate::wallet::Keyring;

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Timing of submissions and confirmation polling
#[derive(Debug, Clone, Copy)]
pub struct SequencerSettings {
    /// Status poll interval, normally the block time
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
    pub submit_timeout: Duration,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(6),
            confirmation_timeout: Duration::from_secs(120),
            submit_timeout: Duration::from_secs(30),
        }
    }
}

/// A stage that stopped before every transaction was confirmed.
///
/// `report` is set once the batch was submitted, so transactions already
/// in flight stay visible in the run summary.
#[derive(Debug)]
pub struct StageHalt {
    pub report: Option<StageReport>,
    pub error: OrchestratorError,
}

impl From<OrchestratorError> for StageHalt {
    fn from(error: OrchestratorError) -> Self {
        Self {
            report: None,
            error,
        }
    }
}

/// Per-worker state: nonces, pending batch and confirmation polling.
///
/// Sequential runs share one context across accounts; concurrent runs give
/// each account its own.
pub struct RunContext {
    pub nonces: NonceBook,
    pipeline: TransactionPipeline,
    waiter: ConfirmationWaiter,
}

/// Top-level driver for account workflows
pub struct WorkflowSequencer {
    client: Arc<dyn ChainClient>,
    keyring: Keyring,
    packer: BatchPacker,
    settings: SequencerSettings,
    cancel: CancelToken,
    run_id: Uuid,
}

impl WorkflowSequencer {
    pub fn new(
        client: Arc<dyn ChainClient>,
        keyring: Keyring,
        packer: BatchPacker,
        settings: SequencerSettings,
    ) -> Self {
        Self {
            client,
            keyring,
            packer,
            settings,
            cancel: CancelToken::never(),
            run_id: Uuid::new_v4(),
        }
    }

    /// Abort remaining stages when the token is cancelled
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Fresh nonce book, pipeline and waiter
    pub fn context(&self) -> RunContext {
        RunContext {
            nonces: NonceBook::new(),
            pipeline: TransactionPipeline::new(
                self.client.clone(),
                self.keyring.clone(),
                self.settings.submit_timeout,
            ),
            waiter: ConfirmationWaiter::new(
                self.client.clone(),
                self.settings.poll_interval,
                self.settings.confirmation_timeout,
            )
            .with_cancel(self.cancel.clone()),
        }
    }

    /// Pack a stage's operations into unsigned transactions.
    ///
    /// Nothing is submitted. On error every nonce drawn by this call is
    /// released again.
    pub async fn plan_stage(
        &self,
        ctx: &mut RunContext,
        stage: Stage,
        descriptors: &[StageDescriptor],
    ) -> OrchestratorResult<Vec<UnsignedTransaction>> {
        if descriptors.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "{} stage has nothing to do",
                stage
            )));
        }
        for descriptor in descriptors {
            if descriptor.stage != stage {
                return Err(OrchestratorError::Validation(format!(
                    "{} descriptor passed to {} stage",
                    descriptor.stage, stage
                )));
            }
            descriptor.validate()?;
        }

        let mut planned = Vec::new();
        if let Err(e) = self.pack_into(ctx, descriptors, &mut planned).await {
            ctx.nonces.release_all(&issued_nonces(&planned));
            return Err(e);
        }

        for descriptor in descriptors {
            let count = planned.iter().filter(|tx| tx.kind == descriptor.kind).count();
            crate::metrics::record_tx_planned(descriptor.kind.name(), count);
        }
        debug!("Planned {} transactions for {} stage", planned.len(), stage);

        Ok(planned)
    }

    async fn pack_into(
        &self,
        ctx: &mut RunContext,
        descriptors: &[StageDescriptor],
        planned: &mut Vec<UnsignedTransaction>,
    ) -> OrchestratorResult<()> {
        for descriptor in descriptors {
            let allocator = ctx
                .nonces
                .allocator(self.client.as_ref(), &descriptor.sender)
                .await?;
            planned.extend(self.packer.pack(&descriptor.pack_request(), allocator)?);
        }
        Ok(())
    }

    /// Plan, sign, submit and confirm one stage.
    ///
    /// Confirmation stops at the first transaction that does not succeed;
    /// the caller decides whether to continue from the returned report.
    /// Errors raised after submission carry the partial report.
    pub async fn run_stage(
        &self,
        ctx: &mut RunContext,
        stage: Stage,
        descriptors: &[StageDescriptor],
    ) -> Result<StageReport, StageHalt> {
        self.check_cancelled(stage)?;

        let txs = self.plan_stage(ctx, stage, descriptors).await?;
        let issued = issued_nonces(&txs);
        let mut report = StageReport::new(stage, &txs);

        if let Err(e) = ctx.pipeline.sign_and_push(txs) {
            ctx.pipeline.discard();
            ctx.nonces.release_all(&issued);
            return Err(e.into());
        }

        if let Err(e) = self.check_cancelled(stage) {
            ctx.pipeline.discard();
            ctx.nonces.release_all(&issued);
            return Err(e.into());
        }

        let hashes = match ctx.pipeline.submit().await {
            Ok(hashes) => hashes,
            Err(e) => {
                ctx.nonces.release_all(&issued);
                return Err(e.into());
            }
        };
        report.record_hashes(&hashes);
        info!(
            "{} stage submitted {} transactions, awaiting confirmation",
            stage,
            hashes.len()
        );

        let mut results = Vec::with_capacity(hashes.len());
        let waited = ctx.waiter.await_into(&hashes, &mut results).await;
        for (result, tx) in results.iter().zip(&report.transactions) {
            crate::metrics::record_confirmation(
                tx.kind.name(),
                result.status.name(),
                result.elapsed.as_secs_f64(),
            );
        }
        report.record_confirmations(results);

        match waited {
            Ok(()) => Ok(report),
            Err(error) => {
                warn!(
                    "{} stage interrupted with {} of {} transactions confirmed",
                    stage,
                    report.confirmations.len(),
                    hashes.len()
                );
                Err(StageHalt {
                    report: Some(report),
                    error,
                })
            }
        }
    }

    /// Run one account's stages in order with a fresh context.
    ///
    /// Returns the halting error if any stage did not fully succeed.
    pub async fn run_workflow(&self, plan: &AccountPlan) -> OrchestratorResult<WorkflowReport> {
        let mut ctx = self.context();
        let (report, halt) = self.drive(&mut ctx, plan).await;
        match halt {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Run accounts one after another, stopping the run at the first halt
    pub async fn run_all(&self, plans: &[AccountPlan]) -> RunSummary {
        let started_at = Utc::now();
        let mut ctx = self.context();
        let mut accounts = Vec::with_capacity(plans.len());
        let mut skipped = Vec::new();

        for (index, plan) in plans.iter().enumerate() {
            let (report, halt) = self.drive(&mut ctx, plan).await;
            accounts.push(report);

            if let Some(e) = halt {
                error!("Run halted at account {}: {}", plan.account, e);
                skipped = plans[index + 1..].iter().map(|p| p.account.clone()).collect();
                break;
            }
        }

        RunSummary {
            run_id: self.run_id,
            started_at,
            finished_at: Utc::now(),
            accounts,
            skipped,
        }
    }

    /// Run accounts in parallel, each with its own nonces and waiter.
    ///
    /// Plans must not share a sender; a halt only stops its own account.
    pub async fn run_concurrent(&self, plans: &[AccountPlan]) -> OrchestratorResult<RunSummary> {
        let mut seen = HashSet::new();
        for plan in plans {
            for sender in plan.senders() {
                if !seen.insert(sender.clone()) {
                    return Err(OrchestratorError::Validation(format!(
                        "Sender {} appears in more than one workflow; run sequentially",
                        sender
                    )));
                }
            }
        }

        let started_at = Utc::now();
        let runs = plans.iter().map(|plan| async move {
            let mut ctx = self.context();
            let (report, halt) = self.drive(&mut ctx, plan).await;
            if let Some(e) = halt {
                error!("Workflow for {} halted: {}", plan.account, e);
            }
            report
        });
        let accounts = futures::future::join_all(runs).await;

        Ok(RunSummary {
            run_id: self.run_id,
            started_at,
            finished_at: Utc::now(),
            accounts,
            skipped: Vec::new(),
        })
    }

    async fn drive(
        &self,
        ctx: &mut RunContext,
        plan: &AccountPlan,
    ) -> (WorkflowReport, Option<OrchestratorError>) {
        let span = info_span!("workflow", run_id = %self.run_id, account = %plan.account);
        self.drive_stages(ctx, plan).instrument(span).await
    }

    async fn drive_stages(
        &self,
        ctx: &mut RunContext,
        plan: &AccountPlan,
    ) -> (WorkflowReport, Option<OrchestratorError>) {
        let mut report = WorkflowReport::new(self.run_id, &plan.account);
        crate::metrics::record_account_started();

        let halt = match plan.validate() {
            Err(e) => Some((None, e)),
            Ok(()) => self.run_stages(ctx, plan, &mut report).await,
        };

        let halt = match halt {
            Some((stage, e)) => {
                if e.should_alert() {
                    error!("Workflow halted: {}", e);
                } else {
                    warn!("Workflow halted: {}", e);
                }
                report.halt(stage, &e);
                Some(e)
            }
            None => {
                info!(
                    "Workflow completed ({} transactions)",
                    report.submitted()
                );
                report.complete();
                None
            }
        };

        crate::metrics::record_account_finished();
        (report, halt)
    }

    async fn run_stages(
        &self,
        ctx: &mut RunContext,
        plan: &AccountPlan,
        report: &mut WorkflowReport,
    ) -> Option<(Option<Stage>, OrchestratorError)> {
        for (stage, descriptors) in plan.grouped() {
            info!("Starting {} stage", stage);

            let stage_report = match self.run_stage(ctx, stage, descriptors).await {
                Ok(stage_report) => stage_report,
                Err(StageHalt { report: partial, error }) => {
                    crate::metrics::record_stage(stage.name(), false);
                    if let Some(partial) = partial {
                        report.stages.push(partial);
                    }
                    return Some((Some(stage), error));
                }
            };

            let success = stage_report.all_succeeded();
            let failure = stage_report.first_failure().cloned();
            report.stages.push(stage_report);
            crate::metrics::record_stage(stage.name(), success);

            if !success {
                let e = failure
                    .and_then(ConfirmationResult::into_error)
                    .unwrap_or_else(|| {
                        OrchestratorError::Internal(format!(
                            "{} stage confirmed fewer transactions than it submitted",
                            stage
                        ))
                    });
                warn!("{} stage did not fully succeed", stage);
                return Some((Some(stage), e));
            }

            info!("{} stage confirmed", stage);
        }
        None
    }

    fn check_cancelled(&self, stage: Stage) -> OrchestratorResult<()> {
        if self.cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled(format!("{} stage", stage)));
        }
        Ok(())
    }
}

fn issued_nonces(txs: &[UnsignedTransaction]) -> Vec<(Address, u64)> {
    txs.iter().map(|tx| (tx.sender.clone(), tx.nonce)).collect()
}
