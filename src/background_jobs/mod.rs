//! Background job registry and execution system.
//!
//! This module runs named jobs at most once at a time across every process
//! sharing the same lock coordinator, bounds each run by its timeout, and
//! records every run in the execution ledger.

mod context;
mod executor;
mod handle;
mod job;
pub mod jobs;
pub mod lock;
mod registry;
mod scheduler;
pub mod sweeper;

pub use context::JobContext;
pub use executor::{
    ExecutorSettings, JobExecutor, RunOutcome, ABANDONED_RUN_REASON, DEFAULT_LEDGER_TIMEOUT,
    DEFAULT_LOCK_SAFETY_MARGIN, SKIPPED_MESSAGE, TRIGGER_MANUAL, TRIGGER_SCHEDULE,
};
pub use handle::{ExecutionInfo, JobInfo};
pub use job::{
    BlockingJobHandler, FnJobHandler, JobDefinition, JobError, JobHandler, RegisteredJob,
    DEFAULT_JOB_TIMEOUT,
};
pub use registry::JobRegistry;
pub use scheduler::IntervalScheduler;
pub use sweeper::{IntervalGate, RetentionSweeper};
