//! FFmpeg-based image/audio/video processor.

use async_trait::async_trait;
use regex_lite::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::dispatch::{source_family, FormatFamily};
use crate::exec::run_tool_with_stderr;

use super::types::{ProcessContext, Processor, ProcessorError, ProcessorOutput};

/// Converts raster images, audio, and video by delegating to FFmpeg.
/// Video inputs with an audio target have their soundtrack extracted.
pub struct MediaProcessor {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    target: String,
}

/// FFmpeg audio codec for a target extension.
pub(crate) fn audio_codec_for(target: &str) -> &'static str {
    match target {
        "mp3" => "libmp3lame",
        "ogg" => "libvorbis",
        "flac" => "flac",
        "wav" => "pcm_s16le",
        "aac" | "m4a" => "aac",
        "opus" => "libopus",
        _ => "copy",
    }
}

impl MediaProcessor {
    pub fn new(ffmpeg_path: PathBuf, ffprobe_path: PathBuf, target: impl Into<String>) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            target: target.into(),
        }
    }

    /// FFmpeg video codec for a target container.
    fn video_codec(target: &str) -> &'static str {
        match target {
            "mp4" | "mkv" | "mov" => "libx264",
            "webm" => "libvpx-vp9",
            "avi" => "mpeg4",
            _ => "copy",
        }
    }

    /// Builds the ffmpeg argument list for this conversion.
    pub(crate) fn build_args(&self, ctx: &ProcessContext, output_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            ctx.input_path.display().to_string(),
        ];

        let target_family = source_family(&self.target);

        match target_family {
            Some(FormatFamily::Image) => {
                if ctx.options.width.is_some() || ctx.options.height.is_some() {
                    let width = ctx.options.width.map(|w| w.to_string());
                    let height = ctx.options.height.map(|h| h.to_string());
                    // Scale down preserving aspect ratio; -1 lets ffmpeg pick
                    // the free dimension.
                    args.extend([
                        "-vf".to_string(),
                        format!(
                            "scale={}:{}",
                            width.as_deref().unwrap_or("-1"),
                            height.as_deref().unwrap_or("-1")
                        ),
                    ]);
                }
                if let Some(quality) = ctx.options.quality {
                    args.extend(["-q:v".to_string(), quality.to_string()]);
                }
            }
            Some(FormatFamily::Audio) => {
                // Drop any video stream: covers video -> audio extraction and
                // cover art embedded in audio inputs.
                args.push("-vn".to_string());
                args.extend(["-c:a".to_string(), audio_codec_for(&self.target).to_string()]);
                if let Some(bitrate) = ctx.options.bitrate_kbps {
                    args.extend(["-b:a".to_string(), format!("{}k", bitrate)]);
                }
                if let Some(rate) = ctx.options.sample_rate_hz {
                    args.extend(["-ar".to_string(), rate.to_string()]);
                }
            }
            _ => {
                args.extend(["-c:v".to_string(), Self::video_codec(&self.target).to_string()]);
                if let Some(quality) = ctx.options.quality {
                    args.extend(["-crf".to_string(), quality.to_string()]);
                } else if let Some(bitrate) = ctx.options.bitrate_kbps {
                    args.extend(["-b:v".to_string(), format!("{}k", bitrate)]);
                }
                if ctx.options.width.is_some() || ctx.options.height.is_some() {
                    let width = ctx.options.width.unwrap_or(u32::MAX);
                    let height = ctx.options.height.unwrap_or(u32::MAX);
                    args.extend([
                        "-vf".to_string(),
                        format!(
                            "scale='min({},iw)':'min({},ih)':force_original_aspect_ratio=decrease",
                            width, height
                        ),
                    ]);
                }
                args.extend(["-c:a".to_string(), "aac".to_string()]);
            }
        }

        args.extend([
            "-loglevel".to_string(),
            "error".to_string(),
            "-progress".to_string(),
            "pipe:2".to_string(),
        ]);

        args.push(output_path.display().to_string());
        args
    }

    /// Probe the input duration for progress calculation. Any failure just
    /// disables duration-based progress.
    async fn probe_duration_secs(&self, path: &Path) -> Option<f64> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            duration: Option<String>,
        }

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format"])
            .arg(path)
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let probe: ProbeOutput = serde_json::from_slice(&output.stdout).ok()?;
        probe.format.duration.as_deref()?.parse::<f64>().ok()
    }
}

#[async_trait]
impl Processor for MediaProcessor {
    fn name(&self) -> &str {
        "media"
    }

    async fn process(&self, ctx: &ProcessContext) -> Result<ProcessorOutput, ProcessorError> {
        if !ctx.input_path.exists() {
            return Err(ProcessorError::InputNotFound {
                path: ctx.input_path.clone(),
            });
        }

        let duration_secs = self.probe_duration_secs(&ctx.input_path).await;

        let filename = format!("{}.{}", ctx.file_stem(), self.target);
        let output_path = ctx.work_dir.join(&filename);
        let args = self.build_args(ctx, &output_path);

        ctx.progress.report(2);

        let time_regex = Regex::new(r"out_time_ms=(\d+)").ok();
        let progress = ctx.progress.clone();

        run_tool_with_stderr(&self.ffmpeg_path, &args, &ctx.work_dir, ctx.timeout, |line| {
            let Some(ref re) = time_regex else { return };
            let Some(duration) = duration_secs.filter(|d| *d > 0.0) else {
                return;
            };
            if let Some(caps) = re.captures(line) {
                if let Some(ms_str) = caps.get(1) {
                    if let Ok(ms) = ms_str.as_str().parse::<f64>() {
                        // out_time_ms is in microseconds despite the name.
                        let current = ms / 1_000_000.0;
                        let percent = ((current / duration) * 100.0).min(99.0) as u8;
                        progress.report(percent);
                    }
                }
            }
        })
        .await?;

        let output = ProcessorOutput::from_file(&output_path, filename)?;
        ctx.progress.report(100);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ConversionOptions;
    use crate::processor::ProgressSender;
    use std::time::Duration;

    fn ctx(source: &str, options: ConversionOptions) -> ProcessContext {
        ProcessContext {
            input_path: PathBuf::from(format!("/work/input.{}", source)),
            original_filename: format!("input.{}", source),
            source_format: source.to_string(),
            work_dir: PathBuf::from("/work"),
            options,
            timeout: Duration::from_secs(30),
            progress: ProgressSender::disabled(),
        }
    }

    fn processor(target: &str) -> MediaProcessor {
        MediaProcessor::new(PathBuf::from("ffmpeg"), PathBuf::from("ffprobe"), target)
    }

    #[test]
    fn test_build_audio_args_mp3() {
        let processor = processor("mp3");
        let ctx = ctx(
            "wav",
            ConversionOptions {
                bitrate_kbps: Some(192),
                sample_rate_hz: Some(44100),
                ..Default::default()
            },
        );

        let args = processor.build_args(&ctx, Path::new("/work/input.mp3"));
        assert!(args.contains(&"-vn".to_string()));
        assert!(args.contains(&"libmp3lame".to_string()));
        assert!(args.contains(&"192k".to_string()));
        assert!(args.contains(&"44100".to_string()));
        assert!(args.contains(&"pipe:2".to_string()));
    }

    #[test]
    fn test_build_audio_args_extraction_from_video() {
        let processor = processor("mp3");
        let ctx = ctx("mp4", ConversionOptions::default());

        let args = processor.build_args(&ctx, Path::new("/work/input.mp3"));
        // Target decides the arg shape: audio target means -vn even for video input.
        assert!(args.contains(&"-vn".to_string()));
    }

    #[test]
    fn test_build_image_args_with_scaling() {
        let processor = processor("png");
        let ctx = ctx(
            "jpg",
            ConversionOptions {
                width: Some(800),
                ..Default::default()
            },
        );

        let args = processor.build_args(&ctx, Path::new("/work/input.png"));
        assert!(args.contains(&"-vf".to_string()));
        assert!(args.contains(&"scale=800:-1".to_string()));
        assert!(!args.contains(&"-vn".to_string()));
    }

    #[test]
    fn test_build_video_args() {
        let processor = processor("webm");
        let ctx = ctx(
            "mp4",
            ConversionOptions {
                quality: Some(30),
                width: Some(1280),
                height: Some(720),
                ..Default::default()
            },
        );

        let args = processor.build_args(&ctx, Path::new("/work/input.webm"));
        assert!(args.contains(&"-c:v".to_string()));
        assert!(args.contains(&"libvpx-vp9".to_string()));
        assert!(args.contains(&"-crf".to_string()));
        assert!(args.contains(&"30".to_string()));
        assert!(args.iter().any(|a| a.contains("force_original_aspect_ratio")));
    }

    #[test]
    fn test_codec_tables() {
        assert_eq!(audio_codec_for("flac"), "flac");
        assert_eq!(audio_codec_for("opus"), "libopus");
        assert_eq!(MediaProcessor::video_codec("mp4"), "libx264");
        assert_eq!(MediaProcessor::video_codec("webm"), "libvpx-vp9");
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor("mp3");
        let mut test_ctx = ctx("wav", ConversionOptions::default());
        test_ctx.input_path = dir.path().join("missing.wav");
        test_ctx.work_dir = dir.path().to_path_buf();

        let err = processor.process(&test_ctx).await.unwrap_err();
        assert!(matches!(err, ProcessorError::InputNotFound { .. }));
    }
}
