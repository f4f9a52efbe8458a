mod file_config;

pub use file_config::{ExecutorConfig, FileConfig, JobConfig, RetentionConfig};

use crate::background_jobs::ExecutorSettings;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

const SECS_PER_HOUR: u64 = 60 * 60;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    /// Absent means local-only locking.
    pub redis_url: Option<String>,
    /// Stored as the lock value.
    pub instance_id: String,

    pub executor: ExecutorConfigSettings,
    pub retention: RetentionSettings,
    pub jobs: HashMap<String, JobSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfigSettings {
    pub lock_safety_margin_secs: u64,
    pub coordinator_timeout_ms: u64,
    pub ledger_timeout_ms: u64,
}

impl Default for ExecutorConfigSettings {
    fn default() -> Self {
        Self {
            lock_safety_margin_secs: 30,
            coordinator_timeout_ms: 2000,
            ledger_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSettings {
    pub retention_days: u64,
    pub sweep_interval_hours: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            retention_days: 7,
            sweep_interval_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSettings {
    pub enabled: bool,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub sleep_ms: Option<u64>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: None,
            timeout_secs: None,
            sleep_ms: None,
        }
    }
}

impl JobSettings {
    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let redis_url = file
            .redis_url
            .or_else(|| cli.redis_url.clone())
            .filter(|url| !url.trim().is_empty());

        let instance_id = file
            .instance_id
            .or_else(|| cli.instance_id.clone())
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let defaults = ExecutorConfigSettings::default();
        let executor_file = file.executor.unwrap_or_default();
        let executor = ExecutorConfigSettings {
            lock_safety_margin_secs: executor_file
                .lock_safety_margin_secs
                .unwrap_or(defaults.lock_safety_margin_secs),
            coordinator_timeout_ms: executor_file
                .coordinator_timeout_ms
                .unwrap_or(defaults.coordinator_timeout_ms),
            ledger_timeout_ms: executor_file
                .ledger_timeout_ms
                .unwrap_or(defaults.ledger_timeout_ms),
        };
        if executor.coordinator_timeout_ms == 0 {
            bail!("executor.coordinator_timeout_ms must be positive, got 0");
        }
        if executor.ledger_timeout_ms == 0 {
            bail!("executor.ledger_timeout_ms must be positive, got 0");
        }
        let minimum_margin_ms = executor
            .ledger_timeout_ms
            .checked_mul(2)
            .and_then(|ms| ms.checked_add(executor.coordinator_timeout_ms))
            .ok_or_else(|| anyhow::anyhow!("executor timeouts are too large"))?;
        let margin_ms = executor
            .lock_safety_margin_secs
            .checked_mul(1000)
            .ok_or_else(|| anyhow::anyhow!("executor.lock_safety_margin_secs is too large"))?;
        if margin_ms <= minimum_margin_ms {
            bail!(
                "executor.lock_safety_margin_secs must exceed 2 * ledger_timeout_ms + coordinator_timeout_ms ({} ms), got {} s",
                minimum_margin_ms,
                executor.lock_safety_margin_secs
            );
        }

        let defaults = RetentionSettings::default();
        let retention_file = file.retention.unwrap_or_default();
        let retention = RetentionSettings {
            retention_days: retention_file
                .retention_days
                .unwrap_or(defaults.retention_days),
            sweep_interval_hours: retention_file
                .sweep_interval_hours
                .unwrap_or(defaults.sweep_interval_hours),
        };
        if retention.retention_days == 0 {
            bail!("retention.retention_days must be positive, got 0");
        }
        if retention.sweep_interval_hours == 0 {
            bail!("retention.sweep_interval_hours must be positive, got 0");
        }
        if retention.retention_days.checked_mul(SECS_PER_DAY).is_none() {
            bail!(
                "retention.retention_days is too large, got {}",
                retention.retention_days
            );
        }
        if retention.sweep_interval_hours.checked_mul(SECS_PER_HOUR).is_none() {
            bail!(
                "retention.sweep_interval_hours is too large, got {}",
                retention.sweep_interval_hours
            );
        }

        let mut jobs = HashMap::new();
        for (name, job) in file.jobs.unwrap_or_default() {
            if job.interval_secs == Some(0) {
                bail!("jobs.{}.interval_secs must be positive, got 0", name);
            }
            jobs.insert(
                name,
                JobSettings {
                    enabled: job.enabled.unwrap_or(true),
                    interval_secs: job.interval_secs,
                    timeout_secs: job.timeout_secs,
                    sleep_ms: job.sleep_ms,
                },
            );
        }

        Ok(Self {
            db_dir,
            redis_url,
            instance_id,
            executor,
            retention,
            jobs,
        })
    }

    pub fn executions_db_path(&self) -> PathBuf {
        self.db_dir.join("executions.db")
    }

    /// Settings of job `name`, defaults when it has no `[jobs.<name>]` table.
    pub fn job(&self, name: &str) -> JobSettings {
        self.jobs.get(name).cloned().unwrap_or_default()
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            lock_safety_margin: Duration::from_secs(self.executor.lock_safety_margin_secs),
            ledger_timeout: self.ledger_timeout(),
        }
    }

    pub fn coordinator_timeout(&self) -> Duration {
        Duration::from_millis(self.executor.coordinator_timeout_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.executor.ledger_timeout_ms)
    }

    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention.retention_days.saturating_mul(SECS_PER_DAY))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_hours.saturating_mul(SECS_PER_HOUR))
    }
}
