use anyhow::anyhow;
use fleet_jobs::background_jobs::{FnJobHandler, JobContext, JobDefinition};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;

#[allow(dead_code)]
pub const PING_TIMEOUT_MS: u64 = 2_000;

/// Job that sleeps `sleep_ms` ignoring cancellation, then reports how long it slept.
#[allow(dead_code)]
pub fn sleeping_job(name: &str, timeout_ms: u64, sleep_ms: u64) -> JobDefinition {
    JobDefinition::new(name, "sleeps then reports")
        .with_timeout(Duration::from_millis(timeout_ms))
        .with_handler(FnJobHandler::new(move |_ctx: JobContext| async move {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
            Ok::<_, anyhow::Error>(json!({ "slept_ms": sleep_ms }))
        }))
}

/// Job that always fails with `message`.
#[allow(dead_code)]
pub fn failing_job(name: &str, message: &'static str) -> JobDefinition {
    JobDefinition::new(name, "always fails").with_handler(FnJobHandler::new(
        move |_ctx: JobContext| async move { Err::<JsonValue, _>(anyhow!(message)) },
    ))
}
