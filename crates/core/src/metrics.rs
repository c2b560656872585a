//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job lifecycle (enqueued, started, completed, failed) by family and tier
//! - Conversion duration histograms by family
//! - Admission rejections by tier
//! - Queue depth and degraded-mode gauges

use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
};

// =============================================================================
// Job Lifecycle Metrics
// =============================================================================

/// Jobs accepted into the queue.
pub static JOBS_ENQUEUED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fileflip_jobs_enqueued_total", "Total jobs enqueued"),
        &["family", "tier"],
    )
    .unwrap()
});

/// Job attempts started by workers.
pub static JOBS_STARTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fileflip_jobs_started_total", "Total job attempts started"),
        &["family", "tier"],
    )
    .unwrap()
});

/// Jobs completed successfully.
pub static JOBS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fileflip_jobs_completed_total",
            "Total jobs completed successfully",
        ),
        &["family", "tier"],
    )
    .unwrap()
});

/// Job failures, split by whether the failure was terminal or retried.
pub static JOBS_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fileflip_jobs_failed_total", "Total job failures"),
        &["family", "tier", "kind"], // kind: "retried", "terminal"
    )
    .unwrap()
});

/// End-to-end duration of successful conversion attempts.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "fileflip_job_duration_seconds",
            "Duration of successful conversion attempts",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["family"],
    )
    .unwrap()
});

// =============================================================================
// Admission Metrics
// =============================================================================

/// Requests rejected by admission control.
pub static ADMISSION_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fileflip_admission_rejected_total",
            "Requests rejected by admission control",
        ),
        &["tier"],
    )
    .unwrap()
});

// =============================================================================
// Queue Gauges (collected dynamically)
// =============================================================================

/// Jobs by current state.
pub static JOBS_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("fileflip_jobs_by_state", "Current job count by state"),
        &["state"],
    )
    .unwrap()
});

/// Whether the job store has degraded to the in-memory fallback (1 = degraded).
pub static STORE_DEGRADED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "fileflip_store_degraded",
        "Whether the durable job store has failed over to the in-memory fallback",
    )
    .unwrap()
});

/// Whether the worker pool is running (1 = running).
pub static WORKER_POOL_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "fileflip_worker_pool_running",
        "Whether the worker pool is running (1) or stopped (0)",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_ENQUEUED.clone()),
        Box::new(JOBS_STARTED.clone()),
        Box::new(JOBS_COMPLETED.clone()),
        Box::new(JOBS_FAILED.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(ADMISSION_REJECTED.clone()),
        Box::new(JOBS_BY_STATE.clone()),
        Box::new(STORE_DEGRADED.clone()),
        Box::new(WORKER_POOL_RUNNING.clone()),
    ]
}
