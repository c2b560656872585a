//! Job storage trait shared by the durable and in-memory backings.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::admission::Tier;
use crate::job::{ConversionOptions, Job, JobInput, JobResultData, QueueCounts};

/// Error type for job store operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// Job not found.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Cannot perform operation due to current state.
    #[error("cannot {operation} job {job_id}: current state is {current_state}")]
    InvalidState {
        job_id: String,
        current_state: String,
        operation: String,
    },

    /// Underlying store error.
    #[error("store error: {0}")]
    Database(String),
}

/// Request to enqueue a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Caller key used for quota accounting.
    pub owner: String,
    /// Caller tier at admission time.
    pub tier: Tier,
    /// Uploaded artifact descriptor.
    pub input: JobInput,
    /// Requested target format or effect name.
    pub target_format: String,
    /// Caller-supplied conversion parameters.
    pub options: ConversionOptions,
}

/// Trait for job queue backends.
///
/// Both implementations guarantee at most one active worker per job:
/// [`claim_next`](JobStore::claim_next) atomically leases the oldest eligible
/// queued job, so no two workers can claim the same one.
pub trait JobStore: Send + Sync {
    /// Create a `Queued` job and make it visible to workers.
    fn enqueue(&self, new_job: NewJob) -> Result<Job, JobError>;

    /// Get a job by ID.
    fn get(&self, id: &str) -> Result<Option<Job>, JobError>;

    /// Lease the oldest claimable `Queued` job: transition it to `Active`,
    /// increment its attempt counter, and reset progress. Jobs gated by a
    /// backoff `not_before` in the future are skipped.
    fn claim_next(&self) -> Result<Option<Job>, JobError>;

    /// Record progress for an `Active` job. No-op if the job is not active.
    /// Progress is clamped to 0-100 and never decreases within an attempt.
    fn update_progress(&self, id: &str, percent: u8) -> Result<(), JobError>;

    /// Mark an `Active` job terminally `Completed` with its result.
    fn complete(&self, id: &str, result: JobResultData) -> Result<Job, JobError>;

    /// Mark an `Active` job terminally `Failed`.
    fn fail(&self, id: &str, reason: &str) -> Result<Job, JobError>;

    /// Return an `Active` job to `Queued` for a retry, gated by `not_before`.
    fn requeue(&self, id: &str, reason: &str, not_before: DateTime<Utc>)
        -> Result<Job, JobError>;

    /// Per-state job counts.
    fn counts(&self) -> Result<QueueCounts, JobError>;

    /// Release underlying connections/threads.
    fn close(&self) {}
}
