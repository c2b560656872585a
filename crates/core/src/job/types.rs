//! Job record and associated value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::admission::Tier;

/// Execution state of a job.
///
/// Legal transitions: `Queued -> Active` (claim), `Active -> Completed`,
/// `Active -> Queued` (retryable failure with attempts left),
/// `Active -> Failed` (terminal). `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    /// Stable string form used in the database and API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

/// Descriptor of the uploaded source artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    /// Where the uploaded file was staged.
    pub stored_path: PathBuf,
    /// Name the client uploaded the file under.
    pub original_filename: String,
    /// Detected source format (lowercased extension).
    pub source_format: String,
}

/// Caller-supplied conversion parameters.
///
/// All fields are optional; processors apply their own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    /// Generic quality knob (codec-dependent, e.g. CRF or compression level).
    pub quality: Option<u8>,
    /// Target audio/video bitrate.
    pub bitrate_kbps: Option<u32>,
    /// Target audio sample rate.
    pub sample_rate_hz: Option<u32>,
    /// Maximum output width for images/video.
    pub width: Option<u32>,
    /// Maximum output height for images/video.
    pub height: Option<u32>,
    /// Audio effect strength, 0.0-1.0.
    pub intensity: Option<f32>,
}

/// Recorded output of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResultData {
    /// Where the converted file lives on disk.
    pub output_path: PathBuf,
    /// Filename suggested to the downloading client.
    pub filename: String,
    /// Content type of the output.
    pub mime_type: String,
    /// Output size in bytes.
    pub size_bytes: u64,
}

/// One conversion request and its tracked execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub owner: String,
    pub tier: Tier,
    pub input: JobInput,
    pub target_format: String,
    pub options: ConversionOptions,
    pub state: JobState,
    /// 0-100; non-decreasing within an attempt, reset to 0 on retry.
    pub progress: u8,
    /// Execution attempts so far; bounded by the configured maximum.
    pub attempt: u32,
    /// Backoff gate: a requeued job is not claimable before this instant.
    pub not_before: Option<DateTime<Utc>>,
    /// Present only when `Completed`.
    pub result: Option<JobResultData>,
    /// Present only when terminally `Failed`.
    pub failure_reason: Option<String>,
    /// First dequeue time.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Per-state counts, used by health and metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}
