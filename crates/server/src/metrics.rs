//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the Fileflip server:
//! - HTTP request metrics (latency, counts, in-flight)
//! - Queue depth and degraded-mode gauges (collected dynamically)
//! - Core job metrics registered from fileflip-core

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "fileflip_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fileflip_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "fileflip_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Core metrics (jobs, admission, queue gauges)
    for metric in fileflip_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// This is called before encoding metrics to update gauges with current
/// values from the job store and worker pool.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    use fileflip_core::metrics::{JOBS_BY_STATE, STORE_DEGRADED, WORKER_POOL_RUNNING};
    use fileflip_core::JobStore;

    if let Ok(counts) = state.store().counts() {
        JOBS_BY_STATE
            .with_label_values(&["queued"])
            .set(counts.queued as i64);
        JOBS_BY_STATE
            .with_label_values(&["active"])
            .set(counts.active as i64);
        JOBS_BY_STATE
            .with_label_values(&["completed"])
            .set(counts.completed as i64);
        JOBS_BY_STATE
            .with_label_values(&["failed"])
            .set(counts.failed as i64);
    }

    STORE_DEGRADED.set(if state.store().is_degraded() { 1 } else { 0 });
    WORKER_POOL_RUNNING.set(if state.pool().status().running { 1 } else { 0 });
}

/// Normalize a path for metric labels (replace job ids with placeholders).
pub fn normalize_path(path: &str) -> String {
    let uuid_regex = regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap();

    uuid_regex.replace_all(path, "{id}").to_string()
}
