//! SQLite-backed durable job store.
//!
//! Job state survives process restarts, and multiple service instances can
//! cooperate on one logical queue through a shared database file. The claim
//! operation runs as a single UPDATE with a subselect, so the lease is atomic
//! and no two workers can take the same job.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::store::{JobError, JobStore, NewJob};
use super::types::{ConversionOptions, Job, JobInput, JobResultData, JobState, QueueCounts};

const JOB_COLUMNS: &str = "id, created_at, owner, tier, input, target_format, options, state, \
     progress, attempt, not_before, result, failure_reason, started_at, finished_at, updated_at";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Create a new SQLite job store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, JobError> {
        let conn = Connection::open(path).map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite job store (useful for testing).
    pub fn in_memory() -> Result<Self, JobError> {
        let conn = Connection::open_in_memory().map_err(|e| JobError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), JobError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                owner TEXT NOT NULL,
                tier TEXT NOT NULL,
                input TEXT NOT NULL,
                target_format TEXT NOT NULL,
                options TEXT NOT NULL,
                state TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                attempt INTEGER NOT NULL DEFAULT 0,
                not_before TEXT,
                result TEXT,
                failure_reason TEXT,
                started_at TEXT,
                finished_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);
            "#,
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(())
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let id: String = row.get(0)?;
        let created_at_str: String = row.get(1)?;
        let owner: String = row.get(2)?;
        let tier_str: String = row.get(3)?;
        let input_json: String = row.get(4)?;
        let target_format: String = row.get(5)?;
        let options_json: String = row.get(6)?;
        let state_str: String = row.get(7)?;
        let progress: u8 = row.get(8)?;
        let attempt: u32 = row.get(9)?;
        let not_before_str: Option<String> = row.get(10)?;
        let result_json: Option<String> = row.get(11)?;
        let failure_reason: Option<String> = row.get(12)?;
        let started_at_str: Option<String> = row.get(13)?;
        let finished_at_str: Option<String> = row.get(14)?;
        let updated_at_str: String = row.get(15)?;

        let parse_ts = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };

        let input: JobInput = serde_json::from_str(&input_json).unwrap_or(JobInput {
            stored_path: Default::default(),
            original_filename: String::new(),
            source_format: String::new(),
        });

        let options: ConversionOptions =
            serde_json::from_str(&options_json).unwrap_or_default();

        let result: Option<JobResultData> =
            result_json.and_then(|json| serde_json::from_str(&json).ok());

        Ok(Job {
            id,
            created_at: parse_ts(&created_at_str),
            owner,
            tier: tier_str.parse().unwrap_or(crate::admission::Tier::Anonymous),
            input,
            target_format,
            options,
            state: state_str.parse().unwrap_or(JobState::Failed),
            progress,
            attempt,
            not_before: not_before_str.as_deref().map(parse_ts),
            result,
            failure_reason,
            started_at: started_at_str.as_deref().map(parse_ts),
            finished_at: finished_at_str.as_deref().map(parse_ts),
            updated_at: parse_ts(&updated_at_str),
        })
    }

    fn get_locked(conn: &Connection, id: &str) -> Result<Job, JobError> {
        let result = conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        );

        match result {
            Ok(job) => Ok(job),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(JobError::NotFound(id.to_string())),
            Err(e) => Err(JobError::Database(e.to_string())),
        }
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

impl JobStore for SqliteJobStore {
    fn enqueue(&self, new_job: NewJob) -> Result<Job, JobError> {
        let conn = self.conn.lock().unwrap();

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let input_json = serde_json::to_string(&new_job.input)
            .map_err(|e| JobError::Database(e.to_string()))?;
        let options_json = serde_json::to_string(&new_job.options)
            .map_err(|e| JobError::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO jobs (id, created_at, owner, tier, input, target_format, options, state, progress, attempt, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, 0, ?)",
            params![
                id,
                now.to_rfc3339(),
                new_job.owner,
                new_job.tier.as_str(),
                input_json,
                new_job.target_format,
                options_json,
                JobState::Queued.as_str(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(Job {
            id,
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
        })
    }

    fn get(&self, id: &str) -> Result<Option<Job>, JobError> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
            params![id],
            Self::row_to_job,
        )
        .optional()
        .map_err(|e| JobError::Database(e.to_string()))
    }

    fn claim_next(&self) -> Result<Option<Job>, JobError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();

        // Single UPDATE with a subselect: the lease is atomic, so exactly
        // one caller can transition a given job out of `queued`.
        let sql = format!(
            "UPDATE jobs SET state = 'active', attempt = attempt + 1, progress = 0, \
                 not_before = NULL, started_at = COALESCE(started_at, ?1), updated_at = ?1 \
             WHERE id = ( \
                 SELECT id FROM jobs \
                 WHERE state = 'queued' AND (not_before IS NULL OR not_before <= ?1) \
                 ORDER BY created_at ASC LIMIT 1 \
             ) \
             RETURNING {}",
            JOB_COLUMNS
        );

        conn.query_row(&sql, params![now], Self::row_to_job)
            .optional()
            .map_err(|e| JobError::Database(e.to_string()))
    }

    fn update_progress(&self, id: &str, percent: u8) -> Result<(), JobError> {
        let conn = self.conn.lock().unwrap();
        let percent = percent.min(100);
        let now = Utc::now();

        // MAX keeps progress monotonic within the attempt; the state guard
        // makes this a no-op for non-active jobs.
        conn.execute(
            "UPDATE jobs SET progress = MAX(progress, ?), updated_at = ? \
             WHERE id = ? AND state = 'active'",
            params![percent, now.to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(())
    }

    fn complete(&self, id: &str, result: JobResultData) -> Result<Job, JobError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::get_locked(&conn, id)?;
        Self::require_active(&current, "complete")?;

        let now = Utc::now();
        let result_json =
            serde_json::to_string(&result).map_err(|e| JobError::Database(e.to_string()))?;

        conn.execute(
            "UPDATE jobs SET state = 'completed', progress = 100, result = ?, \
                 finished_at = ?, updated_at = ? WHERE id = ?",
            params![result_json, now.to_rfc3339(), now.to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(Job {
            state: JobState::Completed,
            progress: 100,
            result: Some(result),
            finished_at: Some(now),
            updated_at: now,
            ..current
        })
    }

    fn fail(&self, id: &str, reason: &str) -> Result<Job, JobError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::get_locked(&conn, id)?;
        Self::require_active(&current, "fail")?;

        let now = Utc::now();

        conn.execute(
            "UPDATE jobs SET state = 'failed', failure_reason = ?, \
                 finished_at = ?, updated_at = ? WHERE id = ?",
            params![reason, now.to_rfc3339(), now.to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(Job {
            state: JobState::Failed,
            failure_reason: Some(reason.to_string()),
            finished_at: Some(now),
            updated_at: now,
            ..current
        })
    }

    fn requeue(
        &self,
        id: &str,
        reason: &str,
        not_before: DateTime<Utc>,
    ) -> Result<Job, JobError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::get_locked(&conn, id)?;
        Self::require_active(&current, "requeue")?;

        tracing::debug!(job_id = id, reason, "requeueing job for retry");

        let now = Utc::now();

        conn.execute(
            "UPDATE jobs SET state = 'queued', progress = 0, not_before = ?, updated_at = ? \
             WHERE id = ?",
            params![not_before.to_rfc3339(), now.to_rfc3339(), id],
        )
        .map_err(|e| JobError::Database(e.to_string()))?;

        Ok(Job {
            state: JobState::Queued,
            progress: 0,
            not_before: Some(not_before),
            updated_at: now,
            ..current
        })
    }

    fn counts(&self) -> Result<QueueCounts, JobError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")
            .map_err(|e| JobError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| JobError::Database(e.to_string()))?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (state, count) = row.map_err(|e| JobError::Database(e.to_string()))?;
            let count = count as usize;
            match state.as_str() {
                "queued" => counts.queued = count,
                "active" => counts.active = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }

        Ok(counts)
    }
}
