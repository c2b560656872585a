//! Client-facing job status translation.
//!
//! The status service reads jobs, never mutates them. Raw failure reasons
//! are recorded server-side; what reaches the client is the classified
//! reason already stored on the job, with internal paths stripped.

use serde::Serialize;

use crate::job::{Job, JobResultData, JobState};

/// Status payload returned by `GET /status/{jobId}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub status: &'static str,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Filename the download will carry, present once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_filename: Option<String>,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.state.as_str(),
            progress: job.progress,
            error: match job.state {
                JobState::Failed => job.failure_reason.clone(),
                _ => None,
            },
            result_filename: job.result.as_ref().map(|r| r.filename.clone()),
        }
    }
}

/// Why a download request cannot be served yet.
#[derive(Debug, PartialEq, Eq)]
pub enum DownloadRejection {
    /// Job exists but has not completed; carries the current state.
    NotReady(&'static str),
}

/// The result record of a job, if it is downloadable.
///
/// Download is only valid once the job is `Completed`; everything else is a
/// not-ready rejection the server maps to a 400.
pub fn downloadable(job: &Job) -> Result<&JobResultData, DownloadRejection> {
    match (&job.state, &job.result) {
        (JobState::Completed, Some(result)) => Ok(result),
        (state, _) => Err(DownloadRejection::NotReady(state.as_str())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::Tier;
    use crate::job::{ConversionOptions, JobInput, JobStore, MemoryJobStore, NewJob};
    use std::path::PathBuf;

    fn make_job() -> Job {
        let store = MemoryJobStore::new();
        store
            .enqueue(NewJob {
                owner: "o".to_string(),
                tier: Tier::Anonymous,
                input: JobInput {
                    stored_path: PathBuf::from("/data/uploads/x.docx"),
                    original_filename: "x.docx".to_string(),
                    source_format: "docx".to_string(),
                },
                target_format: "pdf".to_string(),
                options: ConversionOptions::default(),
            })
            .unwrap()
    }

    fn result_data() -> JobResultData {
        JobResultData {
            output_path: PathBuf::from("/data/results/x.pdf"),
            filename: "x.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size_bytes: 10,
        }
    }

    #[test]
    fn test_queued_status() {
        let job = make_job();
        let status = JobStatus::from(&job);

        assert_eq!(status.status, "queued");
        assert_eq!(status.progress, 0);
        assert!(status.error.is_none());
        assert!(status.result_filename.is_none());
    }

    #[test]
    fn test_failed_status_carries_error() {
        let mut job = make_job();
        job.state = JobState::Failed;
        job.failure_reason = Some("unsupported conversion: docx -> xyz".to_string());

        let status = JobStatus::from(&job);
        assert_eq!(status.status, "failed");
        assert!(status.error.unwrap().contains("unsupported"));
    }

    #[test]
    fn test_error_hidden_while_not_failed() {
        let mut job = make_job();
        job.failure_reason = Some("stale reason from somewhere".to_string());

        let status = JobStatus::from(&job);
        assert!(status.error.is_none());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let job = make_job();
        let json = serde_json::to_string(&JobStatus::from(&job)).unwrap();
        assert!(json.contains("\"jobId\""));
        assert!(!json.contains("job_id"));
    }

    #[test]
    fn test_download_requires_completed() {
        let mut job = make_job();
        assert_eq!(
            downloadable(&job),
            Err(DownloadRejection::NotReady("queued"))
        );

        job.state = JobState::Completed;
        job.result = Some(result_data());
        let result = downloadable(&job).unwrap();
        assert_eq!(result.filename, "x.pdf");
    }

    #[test]
    fn test_failed_job_is_not_downloadable() {
        let mut job = make_job();
        job.state = JobState::Failed;
        assert_eq!(
            downloadable(&job),
            Err(DownloadRejection::NotReady("failed"))
        );
    }
}
