//! In-process archive processor: compress and extract.
//!
//! Unlike the other families this one needs no external tool; ZIP archives
//! use the `zip` crate and tar.gz uses `flate2` + `tar`.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::read::GzDecoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tar::{Archive as TarArchive, Builder as TarBuilder};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::dispatch::ArchiveOperation;

use super::types::{ProcessContext, Processor, ProcessorError, ProcessorOutput};

/// Default compression level (6 balances speed and ratio).
const DEFAULT_COMPRESSION_LEVEL: u8 = 6;

/// Compresses a single input into a zip or tar.gz archive, or extracts a
/// single-entry archive back into a file.
pub struct ArchiveProcessor {
    operation: ArchiveOperation,
}

impl ArchiveProcessor {
    pub fn new(operation: ArchiveOperation) -> Self {
        Self { operation }
    }

    fn compression_level(ctx: &ProcessContext) -> u8 {
        ctx.options
            .quality
            .unwrap_or(DEFAULT_COMPRESSION_LEVEL)
            .min(9)
    }

    fn compress_zip(ctx: &ProcessContext, output_path: &Path) -> Result<(), ProcessorError> {
        let file = File::create(output_path)?;
        let mut writer = ZipWriter::new(file);

        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .compression_level(Some(Self::compression_level(ctx) as i64));

        writer
            .start_file(ctx.original_filename.as_str(), options)
            .map_err(|e| ProcessorError::InvalidArchive {
                reason: e.to_string(),
            })?;

        let mut input = File::open(&ctx.input_path)?;
        std::io::copy(&mut input, &mut writer)?;

        writer.finish().map_err(|e| ProcessorError::InvalidArchive {
            reason: e.to_string(),
        })?;

        Ok(())
    }

    fn compress_tgz(ctx: &ProcessContext, output_path: &Path) -> Result<(), ProcessorError> {
        let file = File::create(output_path)?;
        let encoder = GzEncoder::new(file, Compression::new(Self::compression_level(ctx) as u32));
        let mut builder = TarBuilder::new(encoder);

        builder.append_path_with_name(&ctx.input_path, &ctx.original_filename)?;
        builder.into_inner()?.finish()?;

        Ok(())
    }

    /// Extract the single regular-file entry of a zip archive.
    fn extract_zip(ctx: &ProcessContext) -> Result<(String, Vec<u8>), ProcessorError> {
        let file = File::open(&ctx.input_path)?;
        let mut archive = ZipArchive::new(file).map_err(|e| ProcessorError::InvalidArchive {
            reason: e.to_string(),
        })?;

        let file_indices: Vec<usize> = (0..archive.len())
            .filter(|&i| {
                archive
                    .by_index(i)
                    .map(|entry| entry.is_file())
                    .unwrap_or(false)
            })
            .collect();

        let [index] = file_indices.as_slice() else {
            return Err(ProcessorError::Unsupported {
                reason: format!(
                    "extraction requires exactly one file entry, archive has {}",
                    file_indices.len()
                ),
            });
        };

        let mut entry = archive
            .by_index(*index)
            .map_err(|e| ProcessorError::InvalidArchive {
                reason: e.to_string(),
            })?;

        let name = Path::new(entry.name())
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("extracted")
            .to_string();

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        Ok((name, contents))
    }

    /// Extract the single regular-file entry of a tar.gz archive.
    fn extract_tgz(ctx: &ProcessContext) -> Result<(String, Vec<u8>), ProcessorError> {
        let file = File::open(&ctx.input_path)?;
        let mut archive = TarArchive::new(GzDecoder::new(file));

        let mut found: Option<(String, Vec<u8>)> = None;
        for entry in archive.entries()? {
            let mut entry = entry.map_err(|e| ProcessorError::InvalidArchive {
                reason: e.to_string(),
            })?;

            if !entry.header().entry_type().is_file() {
                continue;
            }

            if found.is_some() {
                return Err(ProcessorError::Unsupported {
                    reason: "extraction requires exactly one file entry, archive has more"
                        .to_string(),
                });
            }

            let name = entry
                .path()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "extracted".to_string());

            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            found = Some((name, contents));
        }

        found.ok_or_else(|| ProcessorError::Unsupported {
            reason: "archive contains no file entries".to_string(),
        })
    }
}

#[async_trait]
impl Processor for ArchiveProcessor {
    fn name(&self) -> &str {
        "archive"
    }

    async fn process(&self, ctx: &ProcessContext) -> Result<ProcessorOutput, ProcessorError> {
        if !ctx.input_path.exists() {
            return Err(ProcessorError::InputNotFound {
                path: ctx.input_path.clone(),
            });
        }

        ctx.progress.report(10);

        let (output_path, filename) = match &self.operation {
            ArchiveOperation::Compress { format } => {
                let extension = if format == "tgz" { "tar.gz" } else { "zip" };
                let filename = format!("{}.{}", ctx.original_filename, extension);
                let output_path = ctx.work_dir.join(&filename);

                if format == "tgz" {
                    Self::compress_tgz(ctx, &output_path)?;
                } else {
                    Self::compress_zip(ctx, &output_path)?;
                }

                (output_path, filename)
            }
            ArchiveOperation::Extract => {
                let (name, contents) = if ctx.source_format == "tgz" {
                    Self::extract_tgz(ctx)?
                } else {
                    Self::extract_zip(ctx)?
                };

                let output_path = ctx.work_dir.join(&name);
                let mut out = File::create(&output_path)?;
                out.write_all(&contents)?;

                (output_path, name)
            }
        };

        let output = ProcessorOutput::from_file(&output_path, filename)?;
        ctx.progress.report(100);
        Ok(output)
    }
}
