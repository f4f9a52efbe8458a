use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fleet_jobs::background_jobs::jobs::register_builtin_jobs;
use fleet_jobs::background_jobs::lock::DistributedLock;
#[cfg(feature = "redis")]
use fleet_jobs::background_jobs::lock::RedisCoordinator;
use fleet_jobs::background_jobs::{
    ExecutionInfo, IntervalScheduler, JobExecutor, JobRegistry, RetentionSweeper,
};
use fleet_jobs::config::{self, AppConfig};
use fleet_jobs::execution_store::SqliteExecutionLedger;
use fleet_jobs::metrics;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
#[command(name = "fleet-jobs", about = "Run background jobs at most once across a fleet")]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding executions.db. Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Lock coordinator URL (e.g. redis://localhost:6379). Without it, locks are process-local.
    #[clap(long)]
    pub redis_url: Option<String>,

    /// Identity written as the lock value. Defaults to a random UUID.
    #[clap(long)]
    pub instance_id: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile abandoned runs, then run scheduled jobs until Ctrl+C.
    Run,

    /// Run one job now and print its outcome.
    Trigger {
        job: String,

        /// Print the gathered metrics after the run.
        #[clap(long)]
        metrics: bool,
    },

    /// List registered jobs with their running state and last execution.
    List,

    /// Show the most recent executions of a job.
    History {
        job: String,

        #[clap(long, default_value_t = 20)]
        limit: usize,
    },

    /// Delete executions older than the retention window.
    Sweep {
        /// Sweep even if the last sweep was less than one interval ago.
        #[clap(long)]
        force: bool,
    },
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            redis_url: args.redis_url.clone(),
            instance_id: args.instance_id.clone(),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_lock(config: &AppConfig) -> Result<DistributedLock> {
    match &config.redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            info!("Using lock coordinator at {}", url);
            let coordinator = RedisCoordinator::new(url)?;
            Ok(DistributedLock::new(
                Arc::new(coordinator),
                &config.instance_id,
                config.coordinator_timeout(),
            ))
        }
        #[cfg(not(feature = "redis"))]
        Some(url) => {
            warn!(
                "redis_url {} ignored: built without the redis feature",
                url
            );
            Ok(DistributedLock::local_only(&config.instance_id))
        }
        None => Ok(DistributedLock::local_only(&config.instance_id)),
    }
}

async fn run_scheduler(executor: JobExecutor, config: &AppConfig) -> Result<()> {
    match executor.reconcile_abandoned_runs().await {
        Ok(count) if count > 0 => info!("Marked {} abandoned executions as failed", count),
        Ok(_) => {}
        Err(e) => error!("Failed to reconcile abandoned executions: {:#}", e),
    }

    for name in config.jobs.keys() {
        if executor.registry().get(name).is_none() {
            warn!("Config has settings for unknown job {}", name);
        }
    }

    let shutdown_token = CancellationToken::new();
    let mut scheduler = IntervalScheduler::new(executor.clone(), shutdown_token.clone());
    let mut job_names: Vec<_> = executor
        .registry()
        .list()
        .iter()
        .map(|job| job.name().to_string())
        .collect();
    job_names.sort();
    for name in job_names {
        if let Some(interval) = config.job(&name).interval() {
            scheduler.schedule(&name, interval)?;
        } else {
            info!("Job {} has no interval, manual triggers only", name);
        }
    }

    let scheduler_handle = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    shutdown_token.cancel();

    if let Err(e) = scheduler_handle.await {
        error!("Scheduler task failed: {}", e);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = config::CliConfig::from(&cli_args);
    let app_config = AppConfig::resolve(&cli_config, file_config)?;
    info!(
        "Instance {} using {:?}",
        app_config.instance_id,
        app_config.executions_db_path()
    );

    metrics::init_metrics();

    let ledger = Arc::new(SqliteExecutionLedger::new(
        app_config.executions_db_path(),
        app_config.ledger_timeout(),
    )?);
    let sweeper = Arc::new(RetentionSweeper::new(
        ledger.clone(),
        app_config.retention_window(),
        app_config.sweep_interval(),
    ));
    let registry = Arc::new(JobRegistry::new());
    register_builtin_jobs(&registry, &app_config, Arc::clone(&sweeper))?;
    let lock = Arc::new(build_lock(&app_config)?);
    let executor = JobExecutor::new(
        registry,
        lock,
        ledger,
        sweeper,
        app_config.executor_settings(),
    );

    match cli_args.command {
        Command::Run => run_scheduler(executor, &app_config).await?,
        Command::Trigger { job, metrics: show_metrics } => {
            let outcome = executor.execute(&job).await?;
            print_json(&outcome)?;
            if show_metrics {
                print!("{}", metrics::gather_metrics());
            }
        }
        Command::List => print_json(&executor.list_jobs_info().await)?,
        Command::History { job, limit } => {
            let history: Vec<ExecutionInfo> = executor
                .get_execution_history(&job, limit)
                .await?
                .into_iter()
                .map(Into::into)
                .collect();
            print_json(&history)?;
        }
        Command::Sweep { force } => {
            if force {
                let deleted = executor.force_sweep().await?;
                print_json(&json!({ "swept": true, "deleted": deleted }))?;
            } else {
                match executor.sweep_if_due().await? {
                    Some(deleted) => print_json(&json!({ "swept": true, "deleted": deleted }))?,
                    None => print_json(&json!({ "swept": false, "deleted": 0 }))?,
                }
            }
        }
    }

    Ok(())
}
