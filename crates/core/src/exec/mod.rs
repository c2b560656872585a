//! External tool invocation.
//!
//! Spawns and supervises conversion subprocesses with a hard timeout. Stderr
//! is captured for diagnostics; on timeout the child is killed. Every exit
//! path (success, non-zero exit, timeout, spawn failure) yields a definitive
//! outcome with no process handle left behind: the child is spawned with
//! `kill_on_drop`, so even a dropped future reaps it.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;

/// Cap on retained stderr, so a chatty tool cannot balloon job records.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// Errors from running an external tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The binary does not exist at the given path.
    #[error("tool not found: {program}")]
    NotFound { program: String },

    /// The tool ran past its allotted time and was killed.
    #[error("tool timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The tool exited with a non-zero status.
    #[error("tool exited with code {code:?}")]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// I/O error while spawning or supervising the tool.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Whether re-running the tool could plausibly succeed.
    ///
    /// A missing binary will not appear on retry; everything else might be
    /// transient (load, locks, flaky converters).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }
}

/// Captured diagnostics from a successful tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Tail of the tool's stderr output.
    pub stderr: String,
}

/// Run an external tool to completion with a hard timeout.
pub async fn run_tool(
    program: &Path,
    args: &[String],
    cwd: &Path,
    limit: Duration,
) -> Result<ToolOutput, ToolError> {
    run_tool_with_stderr(program, args, cwd, limit, |_| {}).await
}

/// Like [`run_tool`], invoking `on_stderr` for every stderr line as it
/// arrives. Processors use this to parse progress output.
pub async fn run_tool_with_stderr(
    program: &Path,
    args: &[String],
    cwd: &Path,
    limit: Duration,
    mut on_stderr: impl FnMut(&str),
) -> Result<ToolOutput, ToolError> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound {
                    program: program.display().to_string(),
                }
            } else {
                ToolError::Io(e)
            }
        })?;

    let stderr = child.stderr.take().expect("stderr should be captured");
    let mut reader = BufReader::new(stderr).lines();

    let supervised = timeout(limit, async {
        let mut tail = String::new();

        while let Ok(Some(line)) = reader.next_line().await {
            on_stderr(&line);

            tail.push_str(&line);
            tail.push('\n');
            if tail.len() > STDERR_TAIL_BYTES {
                let cut = tail.len() - STDERR_TAIL_BYTES;
                // Trim from the front, keeping the most recent output.
                let boundary = tail
                    .char_indices()
                    .map(|(i, _)| i)
                    .find(|&i| i >= cut)
                    .unwrap_or(0);
                tail.drain(..boundary);
            }
        }

        let status = child.wait().await?;
        Ok::<(std::process::ExitStatus, String), std::io::Error>((status, tail))
    })
    .await;

    match supervised {
        Ok(Ok((status, tail))) => {
            if status.success() {
                Ok(ToolOutput { stderr: tail })
            } else {
                Err(ToolError::NonZeroExit {
                    code: status.code(),
                    stderr: tail,
                })
            }
        }
        Ok(Err(e)) => Err(ToolError::Io(e)),
        Err(_) => {
            // The supervised future was dropped; kill the child explicitly
            // rather than waiting for kill_on_drop at handle teardown.
            let _ = child.kill().await;
            Err(ToolError::Timeout {
                timeout_secs: limit.as_secs(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Instant;

    fn sh() -> PathBuf {
        PathBuf::from("sh")
    }

    fn args(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_successful_run() {
        let dir = tempfile::tempdir().unwrap();
        let result = run_tool(&sh(), &args("exit 0"), dir.path(), Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_tool(
            &sh(),
            &args("echo conversion exploded >&2; exit 3"),
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        match err {
            ToolError::NonZeroExit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("conversion exploded"));
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let err = run_tool(
            &sh(),
            &args("sleep 30"),
            dir.path(),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ToolError::Timeout { .. }));
        // The child was killed; we did not wait out the sleep.
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_tool(
            Path::new("definitely-not-a-real-binary-4731"),
            &[],
            dir.path(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ToolError::NotFound { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_cwd_is_honored() {
        let dir = tempfile::tempdir().unwrap();
        run_tool(
            &sh(),
            &args("touch marker-file"),
            dir.path(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(dir.path().join("marker-file").exists());
    }

    #[tokio::test]
    async fn test_stderr_callback_sees_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut lines = Vec::new();
        run_tool_with_stderr(
            &sh(),
            &args("echo one >&2; echo two >&2"),
            dir.path(),
            Duration::from_secs(5),
            |line| lines.push(line.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ToolError::Timeout { timeout_secs: 10 }.is_retryable());
        assert!(ToolError::NonZeroExit {
            code: Some(1),
            stderr: String::new()
        }
        .is_retryable());
        assert!(!ToolError::NotFound {
            program: "soffice".to_string()
        }
        .is_retryable());
    }
}
