use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Lifecycle state of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    /// Never persisted: the run did not start because another holder had the lock.
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "skipped" => Some(ExecutionStatus::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the execution ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub job_name: String,
    pub status: ExecutionStatus,
    /// How the run was triggered: "manual", "schedule", ...
    pub triggered_by: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Handler payload, only for `Completed`.
    pub result: Option<JsonValue>,
    /// Failure text, only for `Failed`.
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// A fresh `Running` record with a newly generated id.
    pub fn started(job_name: &str, triggered_by: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_name: job_name.to_string(),
            status: ExecutionStatus::Running,
            triggered_by: triggered_by.to_string(),
            started_at,
            completed_at: None,
            duration_ms: None,
            result: None,
            error: None,
        }
    }

    pub fn complete(&mut self, result: JsonValue, completed_at: DateTime<Utc>) {
        self.finish(ExecutionStatus::Completed, completed_at);
        self.result = Some(result);
    }

    pub fn fail(&mut self, error: impl Into<String>, completed_at: DateTime<Utc>) {
        self.finish(ExecutionStatus::Failed, completed_at);
        self.error = Some(error.into());
    }

    fn finish(&mut self, status: ExecutionStatus, completed_at: DateTime<Utc>) {
        debug_assert_eq!(self.status, ExecutionStatus::Running);
        self.status = status;
        self.completed_at = Some(completed_at);
        self.duration_ms = Some((completed_at - self.started_at).num_milliseconds());
    }
}

/// What [`super::ExecutionLedger::update`] found for the record's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The row was `running` and now holds the terminal state.
    Updated,
    /// The row already reached a terminal state and was left untouched.
    AlreadyFinished,
    /// No row with that id exists.
    Missing,
}

/// Row ordering for ledger queries, always by `started_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Filter, order and limit for [`super::ExecutionLedger::query`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionQuery {
    pub job_name: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub order: ExecutionOrder,
    pub limit: Option<usize>,
}

impl ExecutionQuery {
    pub fn for_job(job_name: &str) -> Self {
        Self {
            job_name: Some(job_name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_order(mut self, order: ExecutionOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Current UTC time truncated to whole milliseconds, the ledger's storage precision.
///
/// Truncating up front keeps `duration_ms == completed_at - started_at` exact
/// after a round trip through the store.
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
