//! Per-attempt scratch workspace.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::types::ProcessorError;

/// Isolated temp directory for one conversion attempt.
///
/// The directory is created fresh per attempt and removed when the guard
/// drops, on every exit path: success, failure, timeout, and panic. A retried
/// attempt never sees a prior attempt's partial output.
pub struct JobWorkspace {
    temp_dir: TempDir,
}

impl JobWorkspace {
    /// Create a workspace under `parent`, prefixed with the job id for
    /// debuggability while it exists.
    pub fn new(parent: &Path, job_id: &str) -> Result<Self, ProcessorError> {
        std::fs::create_dir_all(parent)?;
        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .tempdir_in(parent)?;
        Ok(Self { temp_dir })
    }

    /// The workspace root.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A path for a scratch file inside the workspace.
    pub fn file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}
