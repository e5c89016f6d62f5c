//! Prometheus metrics for sync runs
//!
//! Provides observability metrics for monitoring the mirror in production.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    /// Histogram: sync run duration per project (seconds)
    pub static ref SYNC_DURATION: HistogramVec = register_histogram_vec!(
        "taskmirror_sync_duration_seconds",
        "Duration of project sync runs",
        &["project"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("Failed to create sync_duration metric");

    /// Counter: sync runs by outcome
    pub static ref SYNC_RUNS: CounterVec = register_counter_vec!(
        "taskmirror_sync_runs_total",
        "Total sync runs by project and status",
        &["project", "status"]
    )
    .expect("Failed to create sync_runs metric");

    /// Counter: rows soft-deleted by reconciliation
    pub static ref ROWS_DEACTIVATED: CounterVec = register_counter_vec!(
        "taskmirror_rows_deactivated_total",
        "Mirror rows marked inactive",
        &["project"]
    )
    .expect("Failed to create rows_deactivated metric");

    /// Counter: sync errors by kind
    pub static ref SYNC_ERRORS: CounterVec = register_counter_vec!(
        "taskmirror_sync_errors_total",
        "Sync errors by kind",
        &["kind", "project"]
    )
    .expect("Failed to create sync_errors metric");

    /// Gauge: service health status (1 = healthy, 0 = unhealthy)
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "taskmirror_health_status",
        "Service health status (1 = healthy, 0 = unhealthy)"
    )
    .expect("Failed to create health_status metric");
}

/// Record a project sync duration
pub fn record_sync_duration(project: &str, duration_secs: f64) {
    SYNC_DURATION
        .with_label_values(&[project])
        .observe(duration_secs);
}

/// Record a finished sync run ("succeeded" / "failed")
pub fn record_sync_run(project: &str, status: &str) {
    SYNC_RUNS.with_label_values(&[project, status]).inc();
}

/// Add soft-deleted rows for a project
pub fn record_deactivated(project: &str, count: usize) {
    ROWS_DEACTIVATED
        .with_label_values(&[project])
        .inc_by(count as f64);
}

/// Increment sync error counter
pub fn record_sync_error(kind: &str, project: &str) {
    SYNC_ERRORS.with_label_values(&[kind, project]).inc();
}

/// Set health status
pub fn set_health_status(healthy: bool) {
    HEALTH_STATUS.set(if healthy { 1.0 } else { 0.0 });
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> crate::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| crate::MirrorError::Other(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| crate::MirrorError::Other(format!("Metrics are not UTF-8: {}", e)))
}
