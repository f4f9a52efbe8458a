use super::job::RegisteredJob;
use crate::execution_store::ExecutionRecord;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Information about a registered job for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub description: String,
    pub timeout_secs: u64,
    pub is_running: bool,
    pub last_execution: Option<ExecutionInfo>,
}

impl JobInfo {
    pub fn new(job: &RegisteredJob, is_running: bool, last_execution: Option<ExecutionInfo>) -> Self {
        Self {
            name: job.name().to_string(),
            description: job.description().to_string(),
            timeout_secs: job.timeout().as_secs(),
            is_running,
            last_execution,
        }
    }
}

/// Serializable execution record.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionInfo {
    pub id: String,
    pub job_name: String,
    pub status: String,
    pub triggered_by: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ExecutionRecord> for ExecutionInfo {
    fn from(record: ExecutionRecord) -> Self {
        Self {
            id: record.id,
            job_name: record.job_name,
            status: record.status.to_string(),
            triggered_by: record.triggered_by,
            started_at: record.started_at.to_rfc3339(),
            completed_at: record.completed_at.map(|at| at.to_rfc3339()),
            duration_ms: record.duration_ms,
            result: record.result,
            error: record.error,
        }
    }
}
