//! Fixed-interval timer trigger for registered jobs.

use super::executor::{JobExecutor, TRIGGER_SCHEDULE};
use super::job::JobError;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for in-flight scheduled runs.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

struct ScheduledJob {
    name: String,
    interval: Duration,
    next_run: Instant,
}

/// Fires `execute_triggered(name, "schedule")` for each configured job on its interval.
///
/// Each tick runs in its own task. A tick landing on a run still in progress
/// resolves through the lock to a skipped outcome.
pub struct IntervalScheduler {
    executor: JobExecutor,
    jobs: Vec<ScheduledJob>,
    shutdown_token: CancellationToken,
    shutdown_grace: Duration,
}

impl IntervalScheduler {
    pub fn new(executor: JobExecutor, shutdown_token: CancellationToken) -> Self {
        Self {
            executor,
            jobs: Vec::new(),
            shutdown_token,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Schedule a registered job. The first run happens one interval from now.
    pub fn schedule(&mut self, name: &str, interval: Duration) -> Result<(), JobError> {
        if self.executor.registry().get(name).is_none() {
            return Err(JobError::JobNotFound(name.to_string()));
        }
        if interval.is_zero() {
            return Err(JobError::InvalidDefinition(format!(
                "job {} has a zero schedule interval",
                name
            )));
        }
        if self.jobs.iter().any(|job| job.name == name) {
            return Err(JobError::DuplicateJob(name.to_string()));
        }
        info!("Scheduling job {} every {:?}", name, interval);
        self.jobs.push(ScheduledJob {
            name: name.to_string(),
            interval,
            next_run: Instant::now() + interval,
        });
        Ok(())
    }

    pub fn scheduled_count(&self) -> usize {
        self.jobs.len()
    }

    /// Main scheduler loop, until the shutdown token fires.
    pub async fn run(mut self) {
        info!("Starting interval scheduler with {} jobs", self.jobs.len());
        let mut in_flight = JoinSet::new();

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!("Scheduled run task failed: {}", e);
                }
            }

            let Some(next) = self.jobs.iter().map(|job| job.next_run).min() else {
                debug!("No scheduled jobs, waiting for shutdown");
                self.shutdown_token.cancelled().await;
                break;
            };

            tokio::select! {
                _ = tokio::time::sleep_until(next) => {
                    let now = Instant::now();
                    for job in self.jobs.iter_mut().filter(|job| job.next_run <= now) {
                        job.next_run = now + job.interval;
                        let executor = self.executor.clone();
                        let name = job.name.clone();
                        in_flight.spawn(async move {
                            match executor.execute_triggered(&name, TRIGGER_SCHEDULE).await {
                                Ok(outcome) => debug!("Scheduled run of {} ended as {}", name, outcome.status),
                                Err(e) => error!("Scheduled run of {} rejected: {}", name, e),
                            }
                        });
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        if !in_flight.is_empty() {
            info!("Waiting for {} scheduled runs to finish", in_flight.len());
            let drained = tokio::time::timeout(self.shutdown_grace, async {
                while in_flight.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(
                    "Scheduled runs still in flight after {:?}, abandoning them",
                    self.shutdown_grace
                );
                in_flight.abort_all();
            }
        }
        info!("Interval scheduler stopped");
    }
}
