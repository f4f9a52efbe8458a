//! Liveness check job.

use crate::background_jobs::{JobContext, JobDefinition, JobHandler};
use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

pub const PING_JOB_NAME: &str = "ping";

/// Sleeps cooperatively, then answers pong.
pub struct PingJob {
    sleep: Duration,
}

impl PingJob {
    pub fn new(sleep: Duration) -> Self {
        Self { sleep }
    }

    pub fn definition(self) -> JobDefinition {
        JobDefinition::new(PING_JOB_NAME, "Sleep briefly and answer pong").with_handler(self)
    }
}

#[async_trait]
impl JobHandler for PingJob {
    async fn run(&self, ctx: JobContext) -> anyhow::Result<JsonValue> {
        if !ctx.sleep(self.sleep).await {
            bail!("cancelled while sleeping");
        }
        Ok(json!({ "pong": true, "slept_ms": self.sleep.as_millis() as u64 }))
    }
}
