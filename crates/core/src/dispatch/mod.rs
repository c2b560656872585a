//! Format dispatch: maps a (source format, target) pair to a conversion plan.
//!
//! Table-driven over five families. An unknown pair is a classification
//! error, not a processing failure: it is returned before any job is created
//! or subprocess spawned, and is never retried.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Office document formats, convertible among each other via LibreOffice.
const DOCUMENT_FORMATS: &[&str] = &["doc", "docx", "odt", "rtf", "txt", "html", "pdf"];

/// Document conversion targets. PDF input is read-only for LibreOffice, so
/// it appears in sources but conversion out of PDF is not offered.
const DOCUMENT_TARGETS: &[&str] = &["pdf", "docx", "odt", "rtf", "txt", "html"];

/// Tabular formats, converted via LibreOffice Calc.
const SPREADSHEET_FORMATS: &[&str] = &["xls", "xlsx", "ods", "csv", "tsv"];

const SPREADSHEET_TARGETS: &[&str] = &["xlsx", "ods", "csv", "pdf"];

/// Raster image formats handled by FFmpeg.
const IMAGE_FORMATS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff"];

/// Audio formats handled by FFmpeg.
const AUDIO_FORMATS: &[&str] = &["mp3", "wav", "ogg", "flac", "aac", "m4a", "opus"];

/// Video formats handled by FFmpeg.
const VIDEO_FORMATS: &[&str] = &["mp4", "mkv", "webm", "avi", "mov"];

/// Archive formats the extract operation accepts.
const ARCHIVE_FORMATS: &[&str] = &["zip", "tgz"];

/// Archive compression targets.
const COMPRESS_TARGETS: &[&str] = &["zip", "tgz"];

/// Family of a source format, used for upload caps and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatFamily {
    Document,
    Spreadsheet,
    Image,
    Audio,
    Video,
    Archive,
}

impl FormatFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatFamily::Document => "document",
            FormatFamily::Spreadsheet => "spreadsheet",
            FormatFamily::Image => "image",
            FormatFamily::Audio => "audio",
            FormatFamily::Video => "video",
            FormatFamily::Archive => "archive",
        }
    }
}

/// Named audio filter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioEffect {
    Equalizer,
    Reverb,
    Echo,
    NoiseReduction,
    Normalize,
    BassBoost,
}

impl AudioEffect {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "equalizer" => Some(AudioEffect::Equalizer),
            "reverb" => Some(AudioEffect::Reverb),
            "echo" => Some(AudioEffect::Echo),
            "noise-reduction" => Some(AudioEffect::NoiseReduction),
            "normalize" => Some(AudioEffect::Normalize),
            "bass-boost" => Some(AudioEffect::BassBoost),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEffect::Equalizer => "equalizer",
            AudioEffect::Reverb => "reverb",
            AudioEffect::Echo => "echo",
            AudioEffect::NoiseReduction => "noise-reduction",
            AudioEffect::Normalize => "normalize",
            AudioEffect::BassBoost => "bass-boost",
        }
    }
}

/// Archive operation selected by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOperation {
    /// Bundle the input file into an archive of the given format.
    Compress { format: String },
    /// Unpack a single-entry archive.
    Extract,
}

/// The conversion strategy selected for a job.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionPlan {
    /// Office document conversion (LibreOffice).
    Document { target: String },
    /// Tabular conversion (LibreOffice Calc).
    Spreadsheet { target: String },
    /// Image/audio/video transcode (FFmpeg).
    Media { target: String },
    /// Named audio filter applied in place (FFmpeg).
    AudioEffect { effect: AudioEffect },
    /// Archive compression or extraction (in-process).
    Archive { operation: ArchiveOperation },
}

impl ConversionPlan {
    /// Processor family label for metrics.
    pub fn family(&self) -> &'static str {
        match self {
            ConversionPlan::Document { .. } => "document",
            ConversionPlan::Spreadsheet { .. } => "spreadsheet",
            ConversionPlan::Media { .. } => "media",
            ConversionPlan::AudioEffect { .. } => "audio_effect",
            ConversionPlan::Archive { .. } => "archive",
        }
    }
}

/// Errors produced by dispatch. These are validation errors: they surface
/// immediately to the caller and are never enqueued or retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The source format is not in any family's supported set.
    #[error("unsupported source format: {0}")]
    UnknownSourceFormat(String),

    /// The (source, target) pair is not supported by any family.
    #[error("unsupported conversion: {source_format} -> {target}")]
    UnsupportedPair { source_format: String, target: String },
}

/// Detect the source format from a filename.
///
/// Lowercased extension; `.tar.gz` is folded into `tgz`.
pub fn detect_source_format(filename: &str) -> Option<String> {
    let lowered = filename.to_ascii_lowercase();
    if lowered.ends_with(".tar.gz") {
        return Some("tgz".to_string());
    }
    lowered
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_string())
        .filter(|ext| !ext.is_empty())
}

/// The family a source format belongs to, if any.
pub fn source_family(format: &str) -> Option<FormatFamily> {
    if DOCUMENT_FORMATS.contains(&format) {
        Some(FormatFamily::Document)
    } else if SPREADSHEET_FORMATS.contains(&format) {
        Some(FormatFamily::Spreadsheet)
    } else if IMAGE_FORMATS.contains(&format) {
        Some(FormatFamily::Image)
    } else if AUDIO_FORMATS.contains(&format) {
        Some(FormatFamily::Audio)
    } else if VIDEO_FORMATS.contains(&format) {
        Some(FormatFamily::Video)
    } else if ARCHIVE_FORMATS.contains(&format) {
        Some(FormatFamily::Archive)
    } else {
        None
    }
}

/// Select a conversion plan for a (source format, target) pair.
pub fn dispatch(source_format: &str, target_format: &str) -> Result<ConversionPlan, DispatchError> {
    let source = source_format.to_ascii_lowercase();
    let target = target_format.to_ascii_lowercase();

    let family = source_family(&source)
        .ok_or_else(|| DispatchError::UnknownSourceFormat(source.clone()))?;

    let unsupported = || DispatchError::UnsupportedPair {
        source_format: source.clone(),
        target: target.clone(),
    };

    // Any non-archive input can be bundled into an archive.
    if COMPRESS_TARGETS.contains(&target.as_str()) && family != FormatFamily::Archive {
        return Ok(ConversionPlan::Archive {
            operation: ArchiveOperation::Compress {
                format: target.clone(),
            },
        });
    }

    match family {
        FormatFamily::Document => {
            if DOCUMENT_TARGETS.contains(&target.as_str()) && target != source {
                Ok(ConversionPlan::Document { target })
            } else {
                Err(unsupported())
            }
        }
        FormatFamily::Spreadsheet => {
            if SPREADSHEET_TARGETS.contains(&target.as_str()) && target != source {
                Ok(ConversionPlan::Spreadsheet { target })
            } else {
                Err(unsupported())
            }
        }
        FormatFamily::Image => {
            if IMAGE_FORMATS.contains(&target.as_str()) {
                Ok(ConversionPlan::Media { target })
            } else {
                Err(unsupported())
            }
        }
        FormatFamily::Audio => {
            if let Some(effect) = AudioEffect::from_name(&target) {
                Ok(ConversionPlan::AudioEffect { effect })
            } else if AUDIO_FORMATS.contains(&target.as_str()) {
                Ok(ConversionPlan::Media { target })
            } else {
                Err(unsupported())
            }
        }
        FormatFamily::Video => {
            // Video targets transcode; audio targets extract the soundtrack.
            if VIDEO_FORMATS.contains(&target.as_str()) || AUDIO_FORMATS.contains(&target.as_str())
            {
                Ok(ConversionPlan::Media { target })
            } else {
                Err(unsupported())
            }
        }
        FormatFamily::Archive => {
            if target == "extract" {
                Ok(ConversionPlan::Archive {
                    operation: ArchiveOperation::Extract,
                })
            } else {
                Err(unsupported())
            }
        }
    }
}
