//! LibreOffice Calc-based spreadsheet processor.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::exec::run_tool;

use super::document::DocumentProcessor;
use super::types::{ProcessContext, Processor, ProcessorError, ProcessorOutput};

/// Converts tabular formats (xls, xlsx, ods, csv, tsv) via headless
/// LibreOffice, with explicit Calc filters where the bare target name is
/// ambiguous.
pub struct SpreadsheetProcessor {
    soffice_path: PathBuf,
    target: String,
}

impl SpreadsheetProcessor {
    pub fn new(soffice_path: PathBuf, target: impl Into<String>) -> Self {
        Self {
            soffice_path,
            target: target.into(),
        }
    }

    /// The `--convert-to` argument for a spreadsheet target.
    ///
    /// CSV needs the full Calc filter spec (comma, double-quote, UTF-8);
    /// bare `csv` lets soffice pick locale-dependent separators.
    pub(crate) fn convert_to_arg(target: &str) -> String {
        match target {
            "csv" => "csv:Text - txt - csv (StarCalc):44,34,UTF8".to_string(),
            other => other.to_string(),
        }
    }
}

#[async_trait]
impl Processor for SpreadsheetProcessor {
    fn name(&self) -> &str {
        "spreadsheet"
    }

    async fn process(&self, ctx: &ProcessContext) -> Result<ProcessorOutput, ProcessorError> {
        if !ctx.input_path.exists() {
            return Err(ProcessorError::InputNotFound {
                path: ctx.input_path.clone(),
            });
        }

        ctx.progress.report(5);

        let mut args =
            DocumentProcessor::build_args(&self.target, &ctx.input_path, &ctx.work_dir);
        // Swap in the filter-qualified target; it sits right after --convert-to.
        if let Some(position) = args.iter().position(|a| a == "--convert-to") {
            args[position + 1] = Self::convert_to_arg(&self.target);
        }

        run_tool(&self.soffice_path, &args, &ctx.work_dir, ctx.timeout).await?;

        ctx.progress.report(90);

        let output_path =
            DocumentProcessor::locate_output(&ctx.input_path, &ctx.work_dir, &self.target)?;
        let filename = format!("{}.{}", ctx.file_stem(), self.target);

        let output = ProcessorOutput::from_file(&output_path, filename)?;
        ctx.progress.report(100);
        Ok(output)
    }
}
