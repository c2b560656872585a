//! In-process fallback job store.
//!
//! Holds everything in a locked map with a FIFO queue of ids. No persistence:
//! jobs are lost if the process restarts mid-flight, and the queue cannot be
//! shared across instances. Acceptable as a degraded-mode fallback when the
//! durable store is unavailable. The single mutex gives the same
//! at-most-one-active-worker-per-job guarantee the durable store gets from
//! its atomic lease.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::store::{JobError, JobStore, NewJob};
use super::types::{Job, JobResultData, JobState, QueueCounts};

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    queue: VecDeque<String>,
}

/// In-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn require_active(job: &Job, operation: &str) -> Result<(), JobError> {
        if job.state != JobState::Active {
            return Err(JobError::InvalidState {
                job_id: job.id.clone(),
                current_state: job.state.as_str().to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

impl JobStore for MemoryJobStore {
    fn enqueue(&self, new_job: NewJob) -> Result<Job, JobError> {
        let mut inner = self.inner.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let job = Job {
            id: id.clone(),
            created_at: now,
            owner: new_job.owner,
            tier: new_job.tier,
            input: new_job.input,
            target_format: new_job.target_format,
            options: new_job.options,
            state: JobState::Queued,
            progress: 0,
            attempt: 0,
            not_before: None,
            result: None,
            failure_reason: None,
            started_at: None,
            finished_at: None,
            updated_at: now,
        };

        inner.jobs.insert(id.clone(), job.clone());
        inner.queue.push_back(id);

        Ok(job)
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.jobs.get(id).cloned())
    }

    fn claim_next(&self) -> Result<Option<Job>, JobError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();

        // Oldest eligible first; backoff-gated ids stay in place so ordering
        // is preserved once their gate elapses.
        let position = inner.queue.iter().position(|id| {
            inner
                .jobs
                .get(id)
                .map(|job| {
                    job.state == JobState::Queued
                        && job.not_before.map(|nb| nb <= now).unwrap_or(true)
                })
                .unwrap_or(false)
        });

        let Some(position) = position else {
            return Ok(None);
        };

        let id = inner.queue.remove(position).expect("position just found");
        let job = inner.jobs.get_mut(&id).expect("queued id has a record");

        job.state = JobState::Active;
        job.attempt += 1;
        job.progress = 0;
        job.not_before = None;
        job.started_at.get_or_insert(now);
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    fn update_progress(&self, id: &str, percent: u8) -> Result<(), JobError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(job) = inner.jobs.get_mut(id) {
            if job.state == JobState::Active {
                job.progress = job.progress.max(percent.min(100));
                job.updated_at = Utc::now();
            }
        }

        Ok(())
    }

    fn complete(&self, id: &str, result: JobResultData) -> Result<Job, JobError> {
        let mut inner = self.inner.lock().unwrap();

        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        Self::require_active(job, "complete")?;

        let now = Utc::now();
        job.state = JobState::Completed;
        job.progress = 100;
        job.result = Some(result);
        job.finished_at = Some(now);
        job.updated_at = now;

        Ok(job.clone())
    }

    fn fail(&self, id: &str, reason: &str) -> Result<Job, JobError> {
        let mut inner = self.inner.lock().unwrap();

        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        Self::require_active(job, "fail")?;

        let now = Utc::now();
        job.state = JobState::Failed;
        job.failure_reason = Some(reason.to_string());
        job.finished_at = Some(now);
        job.updated_at = now;

        Ok(job.clone())
    }

    fn requeue(
        &self,
        id: &str,
        reason: &str,
        not_before: DateTime<Utc>,
    ) -> Result<Job, JobError> {
        let mut inner = self.inner.lock().unwrap();

        let job = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        Self::require_active(job, "requeue")?;

        tracing::debug!(job_id = id, reason, "requeueing job for retry");

        job.state = JobState::Queued;
        job.progress = 0;
        job.not_before = Some(not_before);
        job.updated_at = Utc::now();
        let job = job.clone();

        inner.queue.push_back(job.id.clone());

        Ok(job)
    }

    fn counts(&self) -> Result<QueueCounts, JobError> {
        let inner = self.inner.lock().unwrap();

        let mut counts = QueueCounts::default();
        for job in inner.jobs.values() {
            match job.state {
                JobState::Queued => counts.queued += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }

        Ok(counts)
    }
}
