use lazy_static::lazy_static;
use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::time::Duration;

/// Metric name prefix for all scheduler metrics
const PREFIX: &str = "backup_scheduler";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref SCHEDULE_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_schedule_runs_total"), "Schedule dispatches by outcome"),
        &["status"]
    ).expect("Failed to create schedule_runs_total metric");

    pub static ref RUNNING_SCHEDULES: Gauge = Gauge::new(
        format!("{PREFIX}_running_schedules"),
        "Number of schedules currently marked running"
    ).expect("Failed to create running_schedules metric");

    pub static ref BATCH_ITEMS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_batch_items_total"), "Per-package work items by outcome"),
        &["status"]
    ).expect("Failed to create batch_items_total metric");

    pub static ref BATCH_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_batch_duration_seconds"),
            "Wall-clock duration of one batch from fan-out to finalization"
        )
        .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 1800.0, 7200.0])
    ).expect("Failed to create batch_duration_seconds metric");

    pub static ref REFRESH_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_refresh_runs_total"), "Refresh runs by outcome"),
        &["status"]
    ).expect("Failed to create refresh_runs_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(SCHEDULE_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RUNNING_SCHEDULES.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_ITEMS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BATCH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(REFRESH_RUNS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_schedule_run(status: &str) {
    SCHEDULE_RUNS_TOTAL.with_label_values(&[status]).inc();
}

pub fn set_running_schedules(count: usize) {
    RUNNING_SCHEDULES.set(count as f64);
}

pub fn record_batch_item(succeeded: bool) {
    let status = if succeeded { "succeeded" } else { "failed" };
    BATCH_ITEMS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_batch_duration(elapsed: Duration) {
    BATCH_DURATION_SECONDS.observe(elapsed.as_secs_f64());
}

pub fn record_refresh_run(status: &str) {
    REFRESH_RUNS_TOTAL.with_label_values(&[status]).inc();
}
