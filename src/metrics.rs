use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all job subsystem metrics
const PREFIX: &str = "fleet_jobs";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Execution Metrics
    pub static ref JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_executions_total"), "Job runs by final status"),
        &["job", "status"]
    ).expect("Failed to create job_executions_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Wall-clock duration of job runs in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0]),
        &["job"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_job_running"), "Runs currently executing in this process"),
        &["job"]
    ).expect("Failed to create job_running metric");

    // Lock Metrics
    pub static ref LOCK_FALLBACK_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_lock_fallback_total"),
        "Lock acquisitions attempted on the local fallback"
    ).expect("Failed to create lock_fallback_total metric");

    pub static ref COORDINATOR_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_coordinator_errors_total"), "Failed coordinator calls"),
        &["operation"]
    ).expect("Failed to create coordinator_errors_total metric");

    // Ledger Metrics
    pub static ref LEDGER_ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ledger_errors_total"), "Failed execution ledger calls"),
        &["operation"]
    ).expect("Failed to create ledger_errors_total metric");

    pub static ref LEDGER_SWEPT_ROWS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_ledger_swept_rows_total"),
        "Execution rows removed by retention sweeps"
    ).expect("Failed to create ledger_swept_rows_total metric");
}

/// Register all metrics with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(LOCK_FALLBACK_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(COORDINATOR_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LEDGER_ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LEDGER_SWEPT_ROWS_TOTAL.clone()));

    tracing::debug!("Metrics registered");
}

/// Record a finished (or skipped) run
pub fn record_job_execution(job: &str, status: &str, duration: Duration) {
    JOB_EXECUTIONS_TOTAL.with_label_values(&[job, status]).inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

pub fn record_job_skipped(job: &str) {
    JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job, "skipped"])
        .inc();
}

pub fn set_job_running(job: &str, running: bool) {
    JOB_RUNNING
        .with_label_values(&[job])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_lock_fallback() {
    LOCK_FALLBACK_TOTAL.inc();
}

pub fn record_coordinator_error(operation: &str) {
    COORDINATOR_ERRORS_TOTAL
        .with_label_values(&[operation])
        .inc();
}

pub fn record_ledger_error(operation: &str) {
    LEDGER_ERRORS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_swept_rows(count: usize) {
    LEDGER_SWEPT_ROWS_TOTAL.inc_by(count as f64);
}

/// Render every registered metric in the text exposition format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        init_metrics();

        let metric_families = REGISTRY.gather();
        assert!(!metric_families.is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_record_job_execution() {
        init_metrics();

        record_job_execution("metrics_test_job", "completed", Duration::from_millis(50));
        record_job_skipped("metrics_test_job");

        let completed = JOB_EXECUTIONS_TOTAL
            .with_label_values(&["metrics_test_job", "completed"])
            .get();
        assert!(completed >= 1.0);

        let text = gather_metrics();
        assert!(text.contains("fleet_jobs_job_executions_total"));
        assert!(text.contains("metrics_test_job"));
    }

    #[test]
    fn test_running_gauge_toggles() {
        init_metrics();

        set_job_running("metrics_gauge_job", true);
        assert_eq!(JOB_RUNNING.with_label_values(&["metrics_gauge_job"]).get(), 1.0);
        set_job_running("metrics_gauge_job", false);
        assert_eq!(JOB_RUNNING.with_label_values(&["metrics_gauge_job"]).get(), 0.0);
    }
}
