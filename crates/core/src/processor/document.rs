//! LibreOffice-based document processor.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::exec::run_tool;

use super::types::{ProcessContext, Processor, ProcessorError, ProcessorOutput};

/// Converts office documents (doc, docx, odt, rtf, txt, html) via a headless
/// LibreOffice invocation.
pub struct DocumentProcessor {
    soffice_path: PathBuf,
    target: String,
}

impl DocumentProcessor {
    pub fn new(soffice_path: PathBuf, target: impl Into<String>) -> Self {
        Self {
            soffice_path,
            target: target.into(),
        }
    }

    /// Build the soffice argument list for a conversion.
    ///
    /// Each attempt gets its own UserInstallation profile inside the work
    /// dir: concurrent soffice processes sharing a profile deadlock on the
    /// profile lock file.
    pub(crate) fn build_args(
        target: &str,
        input_path: &Path,
        work_dir: &Path,
    ) -> Vec<String> {
        vec![
            "--headless".to_string(),
            "--norestore".to_string(),
            format!(
                "-env:UserInstallation=file://{}",
                work_dir.join("lo_profile").display()
            ),
            "--convert-to".to_string(),
            target.to_string(),
            "--outdir".to_string(),
            work_dir.join("out").display().to_string(),
            input_path.display().to_string(),
        ]
    }

    /// Locate the converted file: soffice names it `<input stem>.<target>`
    /// in the outdir.
    pub(crate) fn locate_output(
        input_path: &Path,
        work_dir: &Path,
        target: &str,
    ) -> Result<PathBuf, ProcessorError> {
        let stem = input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let expected = work_dir.join("out").join(format!("{}.{}", stem, target));

        if expected.exists() {
            return Ok(expected);
        }

        // Some filters rename on conversion; fall back to the only file with
        // the right extension in the outdir.
        let entries = std::fs::read_dir(work_dir.join("out")).map_err(|_| {
            ProcessorError::OutputMissing {
                expected: expected.clone(),
            }
        })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(target) {
                return Ok(path);
            }
        }

        Err(ProcessorError::OutputMissing { expected })
    }
}

#[async_trait]
impl Processor for DocumentProcessor {
    fn name(&self) -> &str {
        "document"
    }

    async fn process(&self, ctx: &ProcessContext) -> Result<ProcessorOutput, ProcessorError> {
        if !ctx.input_path.exists() {
            return Err(ProcessorError::InputNotFound {
                path: ctx.input_path.clone(),
            });
        }

        ctx.progress.report(5);

        let args = Self::build_args(&self.target, &ctx.input_path, &ctx.work_dir);
        run_tool(&self.soffice_path, &args, &ctx.work_dir, ctx.timeout).await?;

        ctx.progress.report(90);

        let output_path = Self::locate_output(&ctx.input_path, &ctx.work_dir, &self.target)?;
        let filename = format!("{}.{}", ctx.file_stem(), self.target);

        let output = ProcessorOutput::from_file(&output_path, filename)?;
        ctx.progress.report(100);
        Ok(output)
    }
}
