mod models;
mod schema;
mod sqlite_execution_ledger;

pub use models::*;
pub use schema::EXECUTION_VERSIONED_SCHEMAS;
pub use sqlite_execution_ledger::SqliteExecutionLedger;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Durable, ordered store of job execution records.
///
/// Calls are synchronous and expected to be short; async callers run them on
/// the blocking pool under their own timeout.
pub trait ExecutionLedger: Send + Sync {
    /// Persist a new record. `Skipped` records are rejected.
    fn insert(&self, record: &ExecutionRecord) -> Result<()>;

    /// Write the terminal fields of a record that is still `running`.
    /// A row that already finished is never overwritten.
    fn update(&self, record: &ExecutionRecord) -> Result<UpdateOutcome>;

    fn query(&self, query: &ExecutionQuery) -> Result<Vec<ExecutionRecord>>;

    /// Delete every record started before `cutoff`. Returns the number removed.
    fn delete_started_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Fail every record of `job_name` still `running` that started before `started_before`.
    fn mark_abandoned(
        &self,
        job_name: &str,
        started_before: DateTime<Utc>,
        reason: &str,
    ) -> Result<usize>;
}
