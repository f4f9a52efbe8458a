//! Lazy retention cleanup of the execution ledger.

use crate::execution_store::{now_millis, ExecutionLedger};
use crate::metrics;
use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Allows an action at most once per interval across concurrent callers.
///
/// The comparison and the update of the last-run time happen under one mutex.
#[derive(Debug)]
pub struct IntervalGate {
    interval: Duration,
    last_run: Mutex<Option<Instant>>,
}

impl IntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` for the one caller allowed to run now and records the run.
    pub fn try_claim(&self) -> bool {
        let now = Instant::now();
        let mut last_run = self
            .last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let due = match *last_run {
            Some(at) => now.duration_since(at) >= self.interval,
            None => true,
        };
        if due {
            *last_run = Some(now);
        }
        due
    }

    /// Record a run that bypassed the gate.
    pub fn mark_run(&self) {
        *self
            .last_run
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
    }
}

/// Deletes ledger rows older than the retention window.
pub struct RetentionSweeper {
    ledger: Arc<dyn ExecutionLedger>,
    retention: Duration,
    gate: IntervalGate,
}

impl RetentionSweeper {
    pub fn new(ledger: Arc<dyn ExecutionLedger>, retention: Duration, interval: Duration) -> Self {
        Self {
            ledger,
            retention,
            gate: IntervalGate::new(interval),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Sweep when the interval has elapsed since the last sweep.
    ///
    /// Returns `None` when not due. A failed sweep still counts as the
    /// interval's sweep.
    pub fn sweep_if_due(&self) -> Result<Option<usize>> {
        if !self.gate.try_claim() {
            debug!("Retention sweep not due");
            return Ok(None);
        }
        self.delete_expired().map(Some)
    }

    /// Sweep now regardless of the interval. Returns the number of rows removed.
    pub fn force_sweep(&self) -> Result<usize> {
        self.gate.mark_run();
        self.delete_expired()
    }

    fn delete_expired(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.retention)?;
        let cutoff = now_millis()
            .checked_sub_signed(retention)
            .with_context(|| format!("retention window {:?} is out of range", self.retention))?;
        info!(
            "Sweeping job executions started before {} ({} days retention)",
            cutoff.to_rfc3339(),
            self.retention.as_secs() / (24 * 60 * 60)
        );

        let deleted = self.ledger.delete_started_before(cutoff).inspect_err(|_| {
            metrics::record_ledger_error("sweep");
        })?;
        metrics::record_swept_rows(deleted);
        if deleted > 0 {
            info!("Deleted {} old job executions", deleted);
        } else {
            info!("No job executions to clean up");
        }
        Ok(deleted)
    }
}
