//! Built-in job bodies.

mod ledger_retention;
mod ping;

pub use ledger_retention::{LedgerRetentionJob, LEDGER_RETENTION_JOB_NAME};
pub use ping::{PingJob, PING_JOB_NAME};

use super::sweeper::RetentionSweeper;
use super::{JobDefinition, JobError, JobRegistry};
use crate::config::AppConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_PING_SLEEP: Duration = Duration::from_millis(100);

/// Register every enabled built-in job, applying `[jobs.<name>]` overrides.
pub fn register_builtin_jobs(
    registry: &JobRegistry,
    config: &AppConfig,
    sweeper: Arc<RetentionSweeper>,
) -> Result<(), JobError> {
    let ping = config.job(PING_JOB_NAME);
    let sleep = ping
        .sleep_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_PING_SLEEP);
    register_configured(registry, config, PingJob::new(sleep).definition())?;

    register_configured(
        registry,
        config,
        LedgerRetentionJob::new(sweeper).definition(),
    )?;
    Ok(())
}

fn register_configured(
    registry: &JobRegistry,
    config: &AppConfig,
    mut definition: JobDefinition,
) -> Result<(), JobError> {
    let settings = config.job(&definition.name);
    if !settings.enabled {
        info!("Job {} disabled in config", definition.name);
        return Ok(());
    }
    if let Some(timeout) = settings.timeout() {
        definition = definition.with_timeout(timeout);
    }
    registry.register(definition)
}
