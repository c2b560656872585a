//! Durable-to-memory failover wrapper.
//!
//! Wraps the durable store and an in-process fallback behind one [`JobStore`]
//! face. While healthy, every call goes to the durable store. The first
//! `Database` error flips the wrapper into degraded mode: all subsequent
//! operations run against the in-memory fallback, so new submissions keep
//! succeeding at the cost of durability. Jobs that only exist in the durable
//! store are unavailable while degraded; health and metrics surface the mode
//! so the trade-off is visible, never silent.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use super::memory_store::MemoryJobStore;
use super::store::{JobError, JobStore, NewJob};
use super::types::{Job, JobResultData, QueueCounts};

/// Job store that degrades from a durable backing to an in-memory fallback.
pub struct FailoverJobStore {
    durable: Box<dyn JobStore>,
    fallback: MemoryJobStore,
    degraded: AtomicBool,
}

impl FailoverJobStore {
    pub fn new(durable: Box<dyn JobStore>) -> Self {
        Self {
            durable,
            fallback: MemoryJobStore::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Start directly in degraded mode, for when the durable store could not
    /// even be opened at startup.
    pub fn degraded_from_start() -> Self {
        Self {
            // Placeholder; never consulted while degraded.
            durable: Box::new(MemoryJobStore::new()),
            fallback: MemoryJobStore::new(),
            degraded: AtomicBool::new(true),
        }
    }

    /// Whether the wrapper has failed over to the in-memory fallback.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn enter_degraded(&self, source: &JobError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            error!(
                error = %source,
                "durable job store unreachable, failing over to in-memory queue; \
                 jobs enqueued durably before the outage are unavailable until restart"
            );
        }
    }

    /// Run `op` against the durable store, failing over on a database error.
    /// `fallback_op` is only consulted once degraded.
    fn route<T>(
        &self,
        op: impl FnOnce(&dyn JobStore) -> Result<T, JobError>,
        fallback_op: impl FnOnce(&MemoryJobStore) -> Result<T, JobError>,
    ) -> Result<T, JobError> {
        if self.is_degraded() {
            return fallback_op(&self.fallback);
        }

        match op(self.durable.as_ref()) {
            Err(JobError::Database(ref msg)) => {
                let err = JobError::Database(msg.clone());
                self.enter_degraded(&err);
                fallback_op(&self.fallback)
            }
            other => other,
        }
    }
}

impl JobStore for FailoverJobStore {
    fn enqueue(&self, new_job: NewJob) -> Result<Job, JobError> {
        let for_fallback = new_job.clone();
        self.route(
            move |store| store.enqueue(new_job),
            move |fallback| {
                warn!("enqueueing job on in-memory fallback (no durability)");
                fallback.enqueue(for_fallback)
            },
        )
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        self.route(|store| store.get(id), |fallback| fallback.get(id))
    }

    fn claim_next(&self) -> Result<Option<Job>, JobError> {
        self.route(
            |store| store.claim_next(),
            |fallback| fallback.claim_next(),
        )
    }

    fn update_progress(&self, id: &str, percent: u8) -> Result<(), JobError> {
        self.route(
            |store| store.update_progress(id, percent),
            |fallback| fallback.update_progress(id, percent),
        )
    }

    fn complete(&self, id: &str, result: JobResultData) -> Result<Job, JobError> {
        let for_fallback = result.clone();
        self.route(
            move |store| store.complete(id, result),
            move |fallback| fallback.complete(id, for_fallback),
        )
    }

    fn fail(&self, id: &str, reason: &str) -> Result<Job, JobError> {
        self.route(
            |store| store.fail(id, reason),
            |fallback| fallback.fail(id, reason),
        )
    }

    fn requeue(
        &self,
        id: &str,
        reason: &str,
        not_before: DateTime<Utc>,
    ) -> Result<Job, JobError> {
        self.route(
            |store| store.requeue(id, reason, not_before),
            |fallback| fallback.requeue(id, reason, not_before),
        )
    }

    fn counts(&self) -> Result<QueueCounts, JobError> {
        self.route(|store| store.counts(), |fallback| fallback.counts())
    }

    fn close(&self) {
        self.durable.close();
    }
}
