//! Conversion processors.
//!
//! One implementation of [`Processor`] per format family. The worker pool
//! resolves a [`ConversionPlan`](crate::dispatch::ConversionPlan) into a
//! processor via [`processor_for`] and runs it inside a per-attempt
//! [`JobWorkspace`].

mod archive;
mod audio_effects;
mod document;
mod media;
mod spreadsheet;
mod types;
mod workspace;

pub use archive::ArchiveProcessor;
pub use audio_effects::AudioEffectsProcessor;
pub use document::DocumentProcessor;
pub use media::MediaProcessor;
pub use spreadsheet::SpreadsheetProcessor;
pub use types::{ProcessContext, Processor, ProcessorError, ProcessorOutput, ProgressSender};
pub use workspace::JobWorkspace;

use crate::config::ToolsConfig;
use crate::dispatch::ConversionPlan;

/// Instantiate the processor for a dispatched conversion plan.
pub fn processor_for(plan: &ConversionPlan, tools: &ToolsConfig) -> Box<dyn Processor> {
    match plan {
        ConversionPlan::Document { target } => Box::new(DocumentProcessor::new(
            tools.soffice_path.clone(),
            target.clone(),
        )),
        ConversionPlan::Spreadsheet { target } => Box::new(SpreadsheetProcessor::new(
            tools.soffice_path.clone(),
            target.clone(),
        )),
        ConversionPlan::Media { target } => Box::new(MediaProcessor::new(
            tools.ffmpeg_path.clone(),
            tools.ffprobe_path.clone(),
            target.clone(),
        )),
        ConversionPlan::AudioEffect { effect } => Box::new(AudioEffectsProcessor::new(
            tools.ffmpeg_path.clone(),
            *effect,
        )),
        ConversionPlan::Archive { operation } => {
            Box::new(ArchiveProcessor::new(operation.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::dispatch;

    #[test]
    fn test_processor_for_each_family() {
        let tools = ToolsConfig::default();

        let cases = [
            ("docx", "pdf", "document"),
            ("xlsx", "csv", "spreadsheet"),
            ("wav", "mp3", "media"),
            ("mp3", "reverb", "audio_effects"),
            ("txt", "zip", "archive"),
            ("zip", "extract", "archive"),
        ];

        for (source, target, expected) in cases {
            let plan = dispatch(source, target).unwrap();
            let processor = processor_for(&plan, &tools);
            assert_eq!(processor.name(), expected, "{} -> {}", source, target);
        }
    }
}
