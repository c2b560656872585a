//! Processor trait and shared value types.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::exec::ToolError;
use crate::job::ConversionOptions;

/// Errors produced while executing a conversion.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The staged input file is gone.
    #[error("input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// The external tool failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The tool reported success but the expected output never appeared.
    #[error("converter produced no output at {expected}")]
    OutputMissing { expected: PathBuf },

    /// The operation can never succeed for this input (e.g. a multi-entry
    /// archive handed to extract).
    #[error("unsupported operation: {reason}")]
    Unsupported { reason: String },

    /// Archive data was malformed.
    #[error("invalid archive: {reason}")]
    InvalidArchive { reason: String },

    /// I/O error during conversion.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessorError {
    /// Whether re-running the attempt could plausibly succeed.
    ///
    /// A missing binary will not appear on retry and a structurally
    /// unsupported input stays unsupported; everything else might be
    /// transient (load, locks, flaky converters).
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Tool(e) => e.is_retryable(),
            // Transient converter flakiness (profile locks, slow flushes)
            // shows up as missing output with a zero exit.
            Self::OutputMissing { .. } => true,
            Self::Io(_) => true,
            Self::InputNotFound { .. } => false,
            Self::Unsupported { .. } => false,
            Self::InvalidArchive { .. } => false,
        }
    }
}

/// The value a processor returns to the worker pool on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorOutput {
    /// Converted file, somewhere under the attempt's work dir.
    pub output_path: PathBuf,
    /// Filename suggested to the downloading client.
    pub filename: String,
    /// Content type of the output.
    pub mime_type: String,
    /// Output size in bytes.
    pub size_bytes: u64,
}

impl ProcessorOutput {
    /// Build an output record from a produced file, stat-ing its size and
    /// guessing the mime type from the path.
    pub fn from_file(output_path: &Path, filename: String) -> Result<Self, ProcessorError> {
        let metadata =
            std::fs::metadata(output_path).map_err(|_| ProcessorError::OutputMissing {
                expected: output_path.to_path_buf(),
            })?;

        let mime_type = mime_guess::from_path(output_path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self {
            output_path: output_path.to_path_buf(),
            filename,
            mime_type,
            size_bytes: metadata.len(),
        })
    }
}

/// Progress reporting handle handed to processors.
///
/// Sends are non-blocking; clients observe progress by polling, so a dropped
/// update is harmless and a full channel never stalls a conversion.
#[derive(Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::Sender<u8>>,
}

impl ProgressSender {
    pub fn new(tx: mpsc::Sender<u8>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sender that discards all updates (tests, fire-and-forget runs).
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Report progress in percent; values above 100 are clamped.
    pub fn report(&self, percent: u8) {
        if let Some(ref tx) = self.tx {
            let _ = tx.try_send(percent.min(100));
        }
    }
}

/// Everything a processor needs to run one conversion attempt.
pub struct ProcessContext {
    /// Staged input file.
    pub input_path: PathBuf,
    /// Name the client uploaded the file under.
    pub original_filename: String,
    /// Detected source format.
    pub source_format: String,
    /// Per-attempt scratch directory; the processor must write its output
    /// under here. Removed by the workspace guard on every exit path.
    pub work_dir: PathBuf,
    /// Caller-supplied conversion parameters.
    pub options: ConversionOptions,
    /// Budget for external tool invocations within this attempt.
    pub timeout: Duration,
    /// Progress reporting handle.
    pub progress: ProgressSender,
}

impl ProcessContext {
    /// Stem of the original filename, used to name outputs.
    pub fn file_stem(&self) -> &str {
        Path::new(&self.original_filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output")
    }
}

/// A conversion strategy the worker pool can execute.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Returns the name of this processor implementation.
    fn name(&self) -> &str;

    /// Run the conversion, writing output under `ctx.work_dir`.
    async fn process(&self, ctx: &ProcessContext) -> Result<ProcessorOutput, ProcessorError>;
}
