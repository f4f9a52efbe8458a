use fleet_jobs::background_jobs::lock::{DistributedLock, MemoryCoordinator};
use fleet_jobs::background_jobs::{
    ExecutorSettings, JobDefinition, JobExecutor, JobRegistry, RetentionSweeper,
};
use fleet_jobs::execution_store::SqliteExecutionLedger;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// One coordinator and one ledger file shared by every instance.
pub struct TestFleet {
    _temp_dir: TempDir,
    pub db_path: PathBuf,
    pub coordinator: Arc<MemoryCoordinator>,
}

/// A single fleet member with its own registry, lock client and ledger connection.
#[allow(dead_code)]
pub struct TestInstance {
    pub registry: Arc<JobRegistry>,
    pub ledger: Arc<SqliteExecutionLedger>,
    pub executor: JobExecutor,
}

impl TestFleet {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("executions.db");
        Self {
            _temp_dir: temp_dir,
            db_path,
            coordinator: Arc::new(MemoryCoordinator::new()),
        }
    }

    pub fn instance(&self, instance_id: &str) -> TestInstance {
        let ledger = Arc::new(
            SqliteExecutionLedger::new(&self.db_path, Duration::from_secs(2))
                .expect("Failed to open execution ledger"),
        );
        let registry = Arc::new(JobRegistry::new());
        let lock = Arc::new(DistributedLock::new(
            self.coordinator.clone(),
            instance_id,
            Duration::from_millis(500),
        ));
        let sweeper = Arc::new(RetentionSweeper::new(
            ledger.clone(),
            RETENTION,
            SWEEP_INTERVAL,
        ));
        let executor = JobExecutor::new(
            registry.clone(),
            lock,
            ledger.clone(),
            sweeper,
            ExecutorSettings::default(),
        );
        TestInstance {
            registry,
            ledger,
            executor,
        }
    }
}

impl TestInstance {
    #[allow(dead_code)]
    pub fn register(&self, definition: JobDefinition) {
        self.registry
            .register(definition)
            .expect("Failed to register job");
    }
}
