//! Runs one instance of a named job under the fleet-wide lock.
//!
//! Per run: lock acquire, `running` ledger row, handler under deadline,
//! terminal ledger row, lock release. Contention never waits: it resolves to a
//! [`ExecutionStatus::Skipped`] outcome that is returned but never persisted.

use super::context::JobContext;
use super::handle::JobInfo;
use super::job::{JobError, RegisteredJob};
use super::lock::DistributedLock;
use super::registry::JobRegistry;
use super::sweeper::RetentionSweeper;
use crate::execution_store::{
    now_millis, ExecutionLedger, ExecutionQuery, ExecutionRecord, ExecutionStatus, UpdateOutcome,
};
use crate::metrics;
use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_LOCK_SAFETY_MARGIN: Duration = Duration::from_secs(30);
pub const DEFAULT_LEDGER_TIMEOUT: Duration = Duration::from_secs(2);

pub const TRIGGER_MANUAL: &str = "manual";
pub const TRIGGER_SCHEDULE: &str = "schedule";

pub const SKIPPED_MESSAGE: &str = "job is already running";
pub const ABANDONED_RUN_REASON: &str = "execution abandoned (owner stopped before finishing)";

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Added to the job timeout to form the lock TTL.
    pub lock_safety_margin: Duration,
    /// Bound on every single ledger call.
    pub ledger_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            lock_safety_margin: DEFAULT_LOCK_SAFETY_MARGIN,
            ledger_timeout: DEFAULT_LEDGER_TIMEOUT,
        }
    }
}

/// What a caller of [`JobExecutor::execute`] gets back.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub job_name: String,
    /// Absent for skipped runs, which have no ledger row.
    pub execution_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunOutcome {
    fn skipped(job_name: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            execution_id: None,
            status: ExecutionStatus::Skipped,
            result: None,
            error: None,
            duration_ms: None,
            message: Some(SKIPPED_MESSAGE.to_string()),
        }
    }

    fn aborted(job_name: &str, error: String) -> Self {
        Self {
            job_name: job_name.to_string(),
            execution_id: None,
            status: ExecutionStatus::Failed,
            result: None,
            error: Some(error),
            duration_ms: None,
            message: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == ExecutionStatus::Skipped
    }
}

impl From<&ExecutionRecord> for RunOutcome {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            job_name: record.job_name.clone(),
            execution_id: Some(record.id.clone()),
            status: record.status,
            result: record.result.clone(),
            error: record.error.clone(),
            duration_ms: record.duration_ms,
            message: None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Explicitly constructed executor; clones share all state.
#[derive(Clone)]
pub struct JobExecutor {
    registry: Arc<JobRegistry>,
    lock: Arc<DistributedLock>,
    ledger: Arc<dyn ExecutionLedger>,
    sweeper: Arc<RetentionSweeper>,
    settings: ExecutorSettings,
}

impl JobExecutor {
    pub fn new(
        registry: Arc<JobRegistry>,
        lock: Arc<DistributedLock>,
        ledger: Arc<dyn ExecutionLedger>,
        sweeper: Arc<RetentionSweeper>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            registry,
            lock,
            ledger,
            sweeper,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run `name` now on behalf of a manual trigger.
    pub async fn execute(&self, name: &str) -> Result<RunOutcome, JobError> {
        self.execute_triggered(name, TRIGGER_MANUAL).await
    }

    /// Run `name` now, recording `triggered_by` in the ledger.
    ///
    /// Only an unknown job name is an error. Handler failures, deadlines and
    /// contention all come back as an outcome.
    pub async fn execute_triggered(
        &self,
        name: &str,
        triggered_by: &str,
    ) -> Result<RunOutcome, JobError> {
        let job = self
            .registry
            .get(name)
            .ok_or_else(|| JobError::JobNotFound(name.to_string()))?;

        let ttl = job.timeout() + self.settings.lock_safety_margin;
        let Some(lock) = self.lock.acquire(job.name(), ttl).await else {
            info!("Skipping job {}: {}", name, SKIPPED_MESSAGE);
            metrics::record_job_skipped(name);
            return Ok(RunOutcome::skipped(name));
        };

        // The run owns the lock from here, even if the caller stops polling.
        let executor = self.clone();
        let trigger = triggered_by.to_string();
        let run_job = Arc::clone(&job);
        let run = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(executor.run_locked(&run_job, &trigger))
                .catch_unwind()
                .await;
            executor.lock.release(lock).await;
            outcome
        });

        match run.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(payload)) => {
                let message = format!("Task panic: {}", panic_message(payload.as_ref()));
                error!("Executor for job {} panicked: {}", name, message);
                Ok(RunOutcome::aborted(name, message))
            }
            Err(e) => {
                error!("Executor task for job {} did not finish: {}", name, e);
                Ok(RunOutcome::aborted(name, format!("executor task failed: {}", e)))
            }
        }
    }

    async fn run_locked(&self, job: &RegisteredJob, triggered_by: &str) -> RunOutcome {
        let mut record = ExecutionRecord::started(job.name(), triggered_by, now_millis());
        let deadline = Instant::now() + job.timeout();
        info!(
            "Starting job {} (execution {}, triggered by {})",
            job.name(),
            record.id,
            triggered_by
        );

        let running = record.clone();
        self.ledger_call("insert", move |ledger| ledger.insert(&running))
            .await;
        metrics::set_job_running(job.name(), true);

        let token = CancellationToken::new();
        let ctx = JobContext::new(job.name(), &record.id, token.clone(), deadline);
        let handler = job.handler();
        let mut task = tokio::spawn(async move { handler.run(ctx).await });

        match tokio::time::timeout_at(deadline, &mut task).await {
            Ok(Ok(Ok(value))) => record.complete(value, now_millis()),
            Ok(Ok(Err(e))) => {
                let message = format!("{:#}", e);
                error!("Job {} failed: {}", job.name(), message);
                record.fail(message, now_millis());
            }
            Ok(Err(join_error)) => {
                let message = match join_error.try_into_panic() {
                    Ok(payload) => format!("Task panic: {}", panic_message(payload.as_ref())),
                    Err(join_error) => format!("Task failed: {}", join_error),
                };
                error!("Job {} failed: {}", job.name(), message);
                record.fail(message, now_millis());
            }
            Err(_) => {
                token.cancel();
                task.abort();
                let message = format!(
                    "deadline exceeded: job did not finish within {:?}",
                    job.timeout()
                );
                warn!("Job {} {}", job.name(), message);
                record.fail(message, now_millis());
            }
        }
        metrics::set_job_running(job.name(), false);

        let elapsed = Duration::from_millis(record.duration_ms.unwrap_or(0).max(0) as u64);
        metrics::record_job_execution(job.name(), record.status.as_str(), elapsed);
        self.finalize(&record).await;
        info!(
            "Job {} finished as {} in {:?} (execution {})",
            job.name(),
            record.status,
            elapsed,
            record.id
        );

        RunOutcome::from(&record)
    }

    /// Persist the terminal record, inserting it when the `running` row is missing.
    async fn finalize(&self, record: &ExecutionRecord) {
        let terminal = record.clone();
        match self
            .ledger_call("update", move |ledger| ledger.update(&terminal))
            .await
        {
            Some(UpdateOutcome::Updated) | None => {}
            Some(UpdateOutcome::AlreadyFinished) => {
                warn!(
                    "Execution {} of {} was already finished elsewhere, keeping stored state",
                    record.id, record.job_name
                );
            }
            Some(UpdateOutcome::Missing) => {
                warn!(
                    "No running row for execution {} of {}, inserting terminal record",
                    record.id, record.job_name
                );
                let terminal = record.clone();
                self.ledger_call("insert", move |ledger| ledger.insert(&terminal))
                    .await;
            }
        }
    }

    async fn run_ledger<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ExecutionLedger) -> Result<T> + Send + 'static,
    {
        let ledger = Arc::clone(&self.ledger);
        let task = tokio::task::spawn_blocking(move || call(ledger.as_ref()));
        let result = match tokio::time::timeout(self.settings.ledger_timeout, task).await {
            Ok(joined) => joined
                .with_context(|| format!("ledger {} task failed", operation))
                .and_then(|result| result),
            Err(_) => Err(anyhow!(
                "ledger {} timed out after {:?}",
                operation,
                self.settings.ledger_timeout
            )),
        };
        if result.is_err() {
            metrics::record_ledger_error(operation);
        }
        result
    }

    /// Ledger write whose failure must not disturb the run.
    async fn ledger_call<T, F>(&self, operation: &'static str, call: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ExecutionLedger) -> Result<T> + Send + 'static,
    {
        match self.run_ledger(operation, call).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Execution ledger {} failed: {:#}", operation, e);
                None
            }
        }
    }

    /// Whether any process currently holds the lock of `name`.
    pub async fn is_running(&self, name: &str) -> bool {
        self.lock.is_held(name).await
    }

    /// Every registered job with its running state and last execution, sorted by name.
    pub async fn list_jobs_info(&self) -> Vec<JobInfo> {
        self.trigger_lazy_sweep();

        let mut jobs = self.registry.list();
        jobs.sort_by(|a, b| a.name().cmp(b.name()));

        let mut infos = Vec::with_capacity(jobs.len());
        for job in jobs {
            let is_running = self.is_running(job.name()).await;
            let last_execution = match self.get_last_execution(job.name()).await {
                Ok(record) => record.map(Into::into),
                Err(e) => {
                    warn!("Could not load last execution of {}: {:#}", job.name(), e);
                    None
                }
            };
            infos.push(JobInfo::new(&job, is_running, last_execution));
        }
        infos
    }

    /// Newest-first executions of `name`, at most `limit`.
    pub async fn get_execution_history(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        self.trigger_lazy_sweep();
        let query = ExecutionQuery::for_job(name).with_limit(limit);
        self.run_ledger("query", move |ledger| ledger.query(&query))
            .await
    }

    pub async fn get_last_execution(&self, name: &str) -> Result<Option<ExecutionRecord>> {
        let query = ExecutionQuery::for_job(name).with_limit(1);
        let records = self
            .run_ledger("query", move |ledger| ledger.query(&query))
            .await?;
        Ok(records.into_iter().next())
    }

    pub async fn sweep_if_due(&self) -> Result<Option<usize>> {
        let sweeper = Arc::clone(&self.sweeper);
        tokio::task::spawn_blocking(move || sweeper.sweep_if_due())
            .await
            .context("retention sweep task failed")?
    }

    pub async fn force_sweep(&self) -> Result<usize> {
        let sweeper = Arc::clone(&self.sweeper);
        tokio::task::spawn_blocking(move || sweeper.force_sweep())
            .await
            .context("retention sweep task failed")?
    }

    /// Start a sweep in the background if one is due. Read paths call this.
    fn trigger_lazy_sweep(&self) {
        let executor = self.clone();
        tokio::spawn(async move {
            match executor.sweep_if_due().await {
                Ok(Some(deleted)) => debug!("Lazy retention sweep removed {} rows", deleted),
                Ok(None) => {}
                Err(e) => warn!("Lazy retention sweep failed: {:#}", e),
            }
        });
    }

    /// Fail `running` rows older than any legitimate run could last.
    ///
    /// Only jobs registered here are reconciled, each against its own timeout
    /// plus the lock safety margin, so a live run holding its lock is never
    /// touched.
    pub async fn reconcile_abandoned_runs(&self) -> Result<usize> {
        let margin = self.settings.lock_safety_margin;
        let now = now_millis();
        let mut horizons = Vec::new();
        for job in self.registry.list() {
            let horizon = chrono::Duration::from_std(job.timeout() + margin)?;
            horizons.push((job.name().to_string(), now - horizon));
        }

        let marked = self
            .run_ledger("reconcile", move |ledger| {
                let mut marked = 0;
                for (name, cutoff) in &horizons {
                    marked += ledger.mark_abandoned(name, *cutoff, ABANDONED_RUN_REASON)?;
                }
                Ok(marked)
            })
            .await?;
        if marked > 0 {
            warn!("Marked {} abandoned job executions as failed", marked);
        } else {
            debug!("No abandoned job executions found");
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::lock::MemoryCoordinator;
    use crate::background_jobs::sweeper::{DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL};
    use crate::background_jobs::{BlockingJobHandler, FnJobHandler, JobDefinition, JobHandler};
    use crate::execution_store::SqliteExecutionLedger;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use futures::future::join_all;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Harness {
        _temp_dir: TempDir,
        registry: Arc<JobRegistry>,
        coordinator: Arc<MemoryCoordinator>,
        ledger: Arc<SqliteExecutionLedger>,
        executor: JobExecutor,
    }

    fn harness() -> Harness {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Arc::new(
            SqliteExecutionLedger::new(temp_dir.path().join("executions.db"), Duration::from_secs(2))
                .unwrap(),
        );
        let (registry, coordinator, executor) = executor_over(ledger.clone());
        Harness {
            _temp_dir: temp_dir,
            registry,
            coordinator,
            ledger,
            executor,
        }
    }

    fn executor_over(
        ledger: Arc<dyn ExecutionLedger>,
    ) -> (Arc<JobRegistry>, Arc<MemoryCoordinator>, JobExecutor) {
        let registry = Arc::new(JobRegistry::new());
        let coordinator = Arc::new(MemoryCoordinator::new());
        let lock = Arc::new(DistributedLock::new(
            coordinator.clone(),
            "test-instance",
            Duration::from_millis(500),
        ));
        let sweeper = Arc::new(RetentionSweeper::new(
            ledger.clone(),
            DEFAULT_RETENTION,
            DEFAULT_SWEEP_INTERVAL,
        ));
        let executor = JobExecutor::new(
            registry.clone(),
            lock,
            ledger,
            sweeper,
            ExecutorSettings::default(),
        );
        (registry, coordinator, executor)
    }

    fn sleeping_job(name: &str, timeout: Duration, sleep: Duration) -> JobDefinition {
        JobDefinition::new(name, "sleeps")
            .with_timeout(timeout)
            .with_handler(FnJobHandler::new(move |_ctx: JobContext| async move {
                tokio::time::sleep(sleep).await;
                Ok::<_, anyhow::Error>(json!({ "slept_ms": sleep.as_millis() as u64 }))
            }))
    }

    fn history(ledger: &SqliteExecutionLedger, name: &str) -> Vec<ExecutionRecord> {
        ledger.query(&ExecutionQuery::for_job(name)).unwrap()
    }

    #[tokio::test]
    async fn test_completed_run_is_recorded() {
        let h = harness();
        h.registry
            .register(sleeping_job("ping", Duration::from_secs(5), Duration::from_millis(20)))
            .unwrap();

        let outcome = h.executor.execute("ping").await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.result, Some(json!({ "slept_ms": 20 })));
        assert!(outcome.duration_ms.unwrap() >= 20);

        let records = history(&h.ledger, "ping");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(Some(&record.id), outcome.execution_id.as_ref());
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.triggered_by, TRIGGER_MANUAL);
        let completed_at = record.completed_at.unwrap();
        assert_eq!(
            record.duration_ms.unwrap(),
            (completed_at - record.started_at).num_milliseconds()
        );
        assert!(!h.executor.is_running("ping").await);
    }

    #[tokio::test]
    async fn test_unknown_job_has_no_side_effects() {
        let h = harness();
        let err = h.executor.execute("missing").await.unwrap_err();
        assert_eq!(err, JobError::JobNotFound("missing".to_string()));
        assert!(h.ledger.query(&ExecutionQuery::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_is_recorded_verbatim() {
        let h = harness();
        h.registry
            .register(JobDefinition::new("broken", "fails").with_handler(FnJobHandler::new(
                |_ctx: JobContext| async {
                    Err::<JsonValue, _>(anyhow!("mailbox locked").context("fetch failed"))
                },
            )))
            .unwrap();

        let outcome = h.executor.execute("broken").await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("fetch failed: mailbox locked"));
        assert_eq!(outcome.result, None);

        let record = &history(&h.ledger, "broken")[0];
        assert_eq!(record.error.as_deref(), Some("fetch failed: mailbox locked"));
        assert!(record.completed_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_deadline_fails_run_and_concurrent_call_skips() {
        let h = harness();
        h.registry
            .register(sleeping_job("ping", Duration::from_secs(2), Duration::from_secs(5)))
            .unwrap();

        let started = std::time::Instant::now();
        let first = {
            let executor = h.executor.clone();
            tokio::spawn(async move { executor.execute("ping").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = h.executor.execute("ping").await.unwrap();
        assert!(second.is_skipped());
        assert_eq!(second.message.as_deref(), Some(SKIPPED_MESSAGE));
        assert_eq!(second.execution_id, None);

        let first = first.await.unwrap().unwrap();
        let elapsed = started.elapsed();
        assert_eq!(first.status, ExecutionStatus::Failed);
        assert!(first.error.as_deref().unwrap().contains("deadline exceeded"));
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(4), "took {:?}", elapsed);

        let records = history(&h.ledger, "ping");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Failed);
        assert!(!h.executor.is_running("ping").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_blocking_handler_finishing_late_stays_failed() {
        let h = harness();
        let finished = Arc::new(AtomicBool::new(false));
        let finished_in_handler = Arc::clone(&finished);
        h.registry
            .register(
                JobDefinition::new("compact", "blocks past its deadline")
                    .with_timeout(Duration::from_millis(500))
                    .with_handler(BlockingJobHandler::new(move |_ctx: &JobContext| {
                        std::thread::sleep(Duration::from_millis(1500));
                        finished_in_handler.store(true, Ordering::SeqCst);
                        Ok(json!({ "compacted": true }))
                    })),
            )
            .unwrap();

        let started = std::time::Instant::now();
        let outcome = h.executor.execute("compact").await.unwrap();
        let elapsed = started.elapsed();
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.error.as_deref().unwrap().contains("deadline exceeded"));
        assert!(elapsed < Duration::from_millis(1200), "took {:?}", elapsed);
        assert!(!finished.load(Ordering::SeqCst));
        assert!(!h.executor.is_running("compact").await);

        while !finished.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let records = history(&h.ledger, "compact");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Failed);
        assert!(records[0].result.is_none());
        assert_eq!(Some(&records[0].id), outcome.execution_id.as_ref());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_run_at_most_once() {
        let h = harness();
        h.registry
            .register(sleeping_job("report", Duration::from_secs(5), Duration::from_millis(300)))
            .unwrap();

        let outcomes = join_all((0..8).map(|_| h.executor.execute("report"))).await;
        let outcomes: Vec<_> = outcomes.into_iter().map(|o| o.unwrap()).collect();

        let completed = outcomes
            .iter()
            .filter(|o| o.status == ExecutionStatus::Completed)
            .count();
        let skipped = outcomes.iter().filter(|o| o.is_skipped()).count();
        assert_eq!(completed, 1);
        assert_eq!(skipped, 7);
        assert_eq!(history(&h.ledger, "report").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_local_fallback_when_coordinator_down() {
        let h = harness();
        h.coordinator.set_available(false);
        h.registry
            .register(sleeping_job("ping", Duration::from_secs(5), Duration::from_millis(300)))
            .unwrap();
        h.registry
            .register(sleeping_job("other", Duration::from_secs(5), Duration::from_millis(100)))
            .unwrap();

        let (a, b, other) = tokio::join!(
            h.executor.execute("ping"),
            h.executor.execute("ping"),
            h.executor.execute("other"),
        );
        let mut statuses = vec![a.unwrap().status, b.unwrap().status];
        statuses.sort_by_key(|s| s.as_str());
        assert_eq!(
            statuses,
            vec![ExecutionStatus::Completed, ExecutionStatus::Skipped]
        );
        assert_eq!(other.unwrap().status, ExecutionStatus::Completed);
        assert!(!h.executor.is_running("ping").await);
    }

    #[tokio::test]
    async fn test_trigger_label_is_persisted() {
        let h = harness();
        h.registry
            .register(sleeping_job("ping", Duration::from_secs(5), Duration::ZERO))
            .unwrap();

        h.executor
            .execute_triggered("ping", TRIGGER_SCHEDULE)
            .await
            .unwrap();
        assert_eq!(history(&h.ledger, "ping")[0].triggered_by, TRIGGER_SCHEDULE);
    }

    struct PanickingHandler;

    #[async_trait]
    impl JobHandler for PanickingHandler {
        async fn run(&self, _ctx: JobContext) -> anyhow::Result<JsonValue> {
            panic!("kaboom")
        }
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_failure() {
        let h = harness();
        h.registry
            .register(JobDefinition::new("panics", "").with_handler(PanickingHandler))
            .unwrap();

        let outcome = h.executor.execute("panics").await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("Task panic: kaboom"));
        assert!(!h.executor.is_running("panics").await);

        let again = h.executor.execute("panics").await.unwrap();
        assert_eq!(again.status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn test_deadline_aborts_handler_ignoring_cancellation() {
        let h = harness();
        let ticks = Arc::new(AtomicUsize::new(0));
        let handler_ticks = ticks.clone();
        h.registry
            .register(
                JobDefinition::new("stubborn", "ignores cancellation")
                    .with_timeout(Duration::from_millis(100))
                    .with_handler(FnJobHandler::new(move |_ctx: JobContext| {
                        let ticks = handler_ticks.clone();
                        async move {
                            for _ in 0..1000 {
                                tokio::time::sleep(Duration::from_millis(10)).await;
                                ticks.fetch_add(1, Ordering::SeqCst);
                            }
                            Ok::<_, anyhow::Error>(json!(null))
                        }
                    })),
            )
            .unwrap();

        let outcome = h.executor.execute("stubborn").await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Failed);

        let after_return = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_return);
    }

    /// Every call fails, as if the database were gone.
    struct FailingLedger;

    impl ExecutionLedger for FailingLedger {
        fn insert(&self, _record: &ExecutionRecord) -> Result<()> {
            anyhow::bail!("disk I/O error")
        }

        fn update(&self, _record: &ExecutionRecord) -> Result<UpdateOutcome> {
            anyhow::bail!("disk I/O error")
        }

        fn query(&self, _query: &ExecutionQuery) -> Result<Vec<ExecutionRecord>> {
            anyhow::bail!("disk I/O error")
        }

        fn delete_started_before(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
            anyhow::bail!("disk I/O error")
        }

        fn mark_abandoned(
            &self,
            _job_name: &str,
            _started_before: DateTime<Utc>,
            _reason: &str,
        ) -> Result<usize> {
            anyhow::bail!("disk I/O error")
        }
    }

    #[tokio::test]
    async fn test_failing_ledger_still_releases_lock() {
        let (registry, _coordinator, executor) = executor_over(Arc::new(FailingLedger));
        registry
            .register(sleeping_job("ping", Duration::from_secs(5), Duration::from_millis(10)))
            .unwrap();

        let outcome = executor.execute("ping").await.unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert!(!executor.is_running("ping").await);

        let again = executor.execute("ping").await.unwrap();
        assert_eq!(again.status, ExecutionStatus::Completed);

        assert!(executor.get_execution_history("ping", 10).await.is_err());
        let jobs = executor.list_jobs_info().await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].last_execution.is_none());
    }

    /// Drops the first insert, then behaves like the wrapped ledger.
    struct FirstInsertFails {
        inner: SqliteExecutionLedger,
        failed: AtomicBool,
    }

    impl ExecutionLedger for FirstInsertFails {
        fn insert(&self, record: &ExecutionRecord) -> Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                anyhow::bail!("database is locked");
            }
            self.inner.insert(record)
        }

        fn update(&self, record: &ExecutionRecord) -> Result<UpdateOutcome> {
            self.inner.update(record)
        }

        fn query(&self, query: &ExecutionQuery) -> Result<Vec<ExecutionRecord>> {
            self.inner.query(query)
        }

        fn delete_started_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
            self.inner.delete_started_before(cutoff)
        }

        fn mark_abandoned(
            &self,
            job_name: &str,
            started_before: DateTime<Utc>,
            reason: &str,
        ) -> Result<usize> {
            self.inner.mark_abandoned(job_name, started_before, reason)
        }
    }

    #[tokio::test]
    async fn test_missing_running_row_is_repaired_on_finalize() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Arc::new(FirstInsertFails {
            inner: SqliteExecutionLedger::new(
                temp_dir.path().join("executions.db"),
                Duration::from_secs(2),
            )
            .unwrap(),
            failed: AtomicBool::new(false),
        });
        let (registry, _coordinator, executor) = executor_over(ledger.clone());
        registry
            .register(sleeping_job("ping", Duration::from_secs(5), Duration::ZERO))
            .unwrap();

        let outcome = executor.execute("ping").await.unwrap();
        let records = ledger.query(&ExecutionQuery::for_job("ping")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ExecutionStatus::Completed);
        assert_eq!(Some(&records[0].id), outcome.execution_id.as_ref());
    }

    #[tokio::test]
    async fn test_reconcile_only_touches_stale_running_rows() {
        let h = harness();
        h.registry
            .register(sleeping_job("ping", Duration::from_secs(1), Duration::ZERO))
            .unwrap();

        let stale = ExecutionRecord::started("ping", TRIGGER_SCHEDULE, now_millis() - chrono::Duration::hours(1));
        let fresh = ExecutionRecord::started("ping", TRIGGER_SCHEDULE, now_millis() - chrono::Duration::seconds(5));
        h.ledger.insert(&stale).unwrap();
        h.ledger.insert(&fresh).unwrap();

        assert_eq!(h.executor.reconcile_abandoned_runs().await.unwrap(), 1);

        let records = history(&h.ledger, "ping");
        let stale_row = records.iter().find(|r| r.id == stale.id).unwrap();
        let fresh_row = records.iter().find(|r| r.id == fresh.id).unwrap();
        assert_eq!(stale_row.status, ExecutionStatus::Failed);
        assert_eq!(stale_row.error.as_deref(), Some(ABANDONED_RUN_REASON));
        assert_eq!(fresh_row.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_reconcile_uses_each_jobs_own_timeout() {
        let h = harness();
        h.registry
            .register(sleeping_job("ping", Duration::from_secs(1), Duration::ZERO))
            .unwrap();
        h.registry
            .register(sleeping_job("export", Duration::from_secs(3600), Duration::ZERO))
            .unwrap();

        let two_minutes_ago = now_millis() - chrono::Duration::minutes(2);
        let stale_ping = ExecutionRecord::started("ping", TRIGGER_SCHEDULE, two_minutes_ago);
        let live_export = ExecutionRecord::started("export", TRIGGER_SCHEDULE, two_minutes_ago);
        let unregistered = ExecutionRecord::started("report", TRIGGER_SCHEDULE, two_minutes_ago);
        for record in [&stale_ping, &live_export, &unregistered] {
            h.ledger.insert(record).unwrap();
        }

        assert_eq!(h.executor.reconcile_abandoned_runs().await.unwrap(), 1);

        assert_eq!(history(&h.ledger, "ping")[0].status, ExecutionStatus::Failed);
        assert_eq!(history(&h.ledger, "export")[0].status, ExecutionStatus::Running);
        assert_eq!(history(&h.ledger, "report")[0].status, ExecutionStatus::Running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_list_jobs_info_reports_running_and_last_execution() {
        let h = harness();
        h.registry
            .register(sleeping_job("zeta", Duration::from_secs(5), Duration::from_millis(400)))
            .unwrap();
        h.registry
            .register(sleeping_job("alpha", Duration::from_secs(5), Duration::ZERO))
            .unwrap();
        h.executor.execute("alpha").await.unwrap();

        let running = {
            let executor = h.executor.clone();
            tokio::spawn(async move { executor.execute("zeta").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let jobs = h.executor.list_jobs_info().await;
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(!jobs[0].is_running);
        assert_eq!(
            jobs[0].last_execution.as_ref().map(|e| e.status.as_str()),
            Some("completed")
        );
        assert!(jobs[1].is_running);
        assert_eq!(
            jobs[1].last_execution.as_ref().map(|e| e.status.as_str()),
            Some("running")
        );

        running.await.unwrap().unwrap();
        assert!(!h.executor.is_running("zeta").await);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        let h = harness();
        h.registry
            .register(sleeping_job("ping", Duration::from_secs(5), Duration::from_millis(5)))
            .unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let outcome = h.executor.execute("ping").await.unwrap();
            ids.push(outcome.execution_id.unwrap());
        }

        let recent = h.executor.get_execution_history("ping", 2).await.unwrap();
        let recent_ids: Vec<_> = recent.iter().map(|r| r.id.clone()).collect();
        assert_eq!(recent_ids, vec![ids[2].clone(), ids[1].clone()]);

        let last = h.executor.get_last_execution("ping").await.unwrap().unwrap();
        assert_eq!(last.id, ids[2]);
        assert!(h.executor.get_last_execution("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweeps_go_through_executor() {
        let h = harness();
        let old_start = now_millis() - chrono::Duration::days(10);
        let mut old = ExecutionRecord::started("ping", TRIGGER_MANUAL, old_start);
        old.complete(json!(null), old_start);
        h.ledger.insert(&old).unwrap();

        assert_eq!(h.executor.sweep_if_due().await.unwrap(), Some(1));
        assert_eq!(h.executor.sweep_if_due().await.unwrap(), None);
        assert_eq!(h.executor.force_sweep().await.unwrap(), 0);
    }
}
