use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub redis_url: Option<String>,
    pub instance_id: Option<String>,

    // Sections
    pub executor: Option<ExecutorConfig>,
    pub retention: Option<RetentionConfig>,
    pub jobs: Option<HashMap<String, JobConfig>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    pub lock_safety_margin_secs: Option<u64>,
    pub coordinator_timeout_ms: Option<u64>,
    pub ledger_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    pub retention_days: Option<u64>,
    pub sweep_interval_hours: Option<u64>,
}

/// `[jobs.<name>]` table.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobConfig {
    pub enabled: Option<bool>,
    /// Absent means manual triggers only.
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    /// Used by the `ping` job only.
    pub sleep_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
