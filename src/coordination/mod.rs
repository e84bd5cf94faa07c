//! Coordination of account workflows
//!
//! A workflow is an ordered list of stages (fund, stake, finalize). The
//! sequencer runs each stage as a pack, sign, submit and confirm cycle and
//! only moves on once every transaction of the stage succeeded.

pub mod engine;
pub mod report;
pub mod stage;

pub use engine::{RunContext, SequencerSettings, StageHalt, WorkflowSequencer};
pub use report::{RunSummary, StageReport, WorkflowOutcome, WorkflowReport};
pub use stage::{
    distribution_plan, stake_plan, unstake_plan, AccountPlan, Stage, StageDescriptor, StakeParams,
};
