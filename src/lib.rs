//! Fleet Jobs Library
//!
//! Single-instance background job execution shared by a fleet of processes.

pub mod background_jobs;
pub mod config;
pub mod execution_store;
pub mod metrics;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use background_jobs::{JobDefinition, JobError, JobExecutor, JobRegistry, RunOutcome};
pub use execution_store::{ExecutionLedger, SqliteExecutionLedger};
