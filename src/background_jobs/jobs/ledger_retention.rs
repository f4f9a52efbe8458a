//! Scheduled form of the retention sweep.
//!
//! Runs a forced sweep, so a timer-driven cleanup happens even when no read
//! traffic triggers the lazy one.

use crate::background_jobs::sweeper::RetentionSweeper;
use crate::background_jobs::{JobContext, JobDefinition, JobHandler};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

pub const LEDGER_RETENTION_JOB_NAME: &str = "ledger_retention";

pub struct LedgerRetentionJob {
    sweeper: Arc<RetentionSweeper>,
}

impl LedgerRetentionJob {
    pub fn new(sweeper: Arc<RetentionSweeper>) -> Self {
        Self { sweeper }
    }

    pub fn definition(self) -> JobDefinition {
        JobDefinition::new(
            LEDGER_RETENTION_JOB_NAME,
            "Delete job executions older than the retention window",
        )
        .with_handler(self)
    }
}

#[async_trait]
impl JobHandler for LedgerRetentionJob {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<JsonValue> {
        if ctx.is_cancelled() {
            anyhow::bail!("cancelled before sweeping");
        }

        let sweeper = Arc::clone(&self.sweeper);
        let deleted = tokio::task::spawn_blocking(move || sweeper.force_sweep())
            .await
            .context("retention sweep task failed")??;
        info!(
            "Retention run {} removed {} executions",
            ctx.execution_id, deleted
        );
        Ok(json!({ "deleted": deleted }))
    }
}
