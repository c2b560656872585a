//! FFmpeg filter-based audio effects processor.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::dispatch::AudioEffect;
use crate::exec::run_tool;

use super::media::audio_codec_for;
use super::types::{ProcessContext, Processor, ProcessorError, ProcessorOutput};

/// Applies a named filter (equalizer, reverb, echo, noise-reduction,
/// normalize, bass-boost) to an audio file, keeping its format.
pub struct AudioEffectsProcessor {
    ffmpeg_path: PathBuf,
    effect: AudioEffect,
}

impl AudioEffectsProcessor {
    pub fn new(ffmpeg_path: PathBuf, effect: AudioEffect) -> Self {
        Self {
            ffmpeg_path,
            effect,
        }
    }

    /// The ffmpeg -af filter string for an effect.
    ///
    /// `intensity` is 0.0-1.0 and scales the effect's dominant parameter;
    /// 0.5 is the neutral default.
    pub(crate) fn filter_string(effect: AudioEffect, intensity: f32) -> String {
        let intensity = intensity.clamp(0.0, 1.0);
        match effect {
            // Mid-band gain from -12dB to +12dB around 1kHz.
            AudioEffect::Equalizer => {
                let gain = (intensity - 0.5) * 24.0;
                format!("equalizer=f=1000:t=q:w=1:g={:.1}", gain)
            }
            // Two delayed taps approximate a small-room reverb.
            AudioEffect::Reverb => {
                let decay = 0.2 + intensity * 0.5;
                format!("aecho=0.8:0.9:40|60:{:.2}|{:.2}", decay, decay * 0.8)
            }
            AudioEffect::Echo => {
                let decay = 0.2 + intensity * 0.6;
                format!("aecho=0.8:0.88:110:{:.2}", decay)
            }
            AudioEffect::NoiseReduction => {
                let floor = -20.0 - intensity * 30.0;
                format!("afftdn=nf={:.0}", floor)
            }
            // EBU R128 loudness normalization; intensity is not meaningful here.
            AudioEffect::Normalize => "loudnorm=I=-16:TP=-1.5:LRA=11".to_string(),
            AudioEffect::BassBoost => {
                let gain = intensity * 15.0;
                format!("bass=g={:.1}", gain)
            }
        }
    }
}

#[async_trait]
impl Processor for AudioEffectsProcessor {
    fn name(&self) -> &str {
        "audio_effects"
    }

    async fn process(&self, ctx: &ProcessContext) -> Result<ProcessorOutput, ProcessorError> {
        if !ctx.input_path.exists() {
            return Err(ProcessorError::InputNotFound {
                path: ctx.input_path.clone(),
            });
        }

        let intensity = ctx.options.intensity.unwrap_or(0.5);
        let filter = Self::filter_string(self.effect, intensity);

        // Filtering forces a re-encode; keep the source container and codec family.
        let extension = ctx.source_format.clone();
        let filename = format!("{}-{}.{}", ctx.file_stem(), self.effect.as_str(), extension);
        let output_path = ctx.work_dir.join(&filename);

        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            ctx.input_path.display().to_string(),
            "-af".to_string(),
            filter,
            "-c:a".to_string(),
            audio_codec_for(&extension).to_string(),
        ];
        if let Some(bitrate) = ctx.options.bitrate_kbps {
            args.extend(["-b:a".to_string(), format!("{}k", bitrate)]);
        }
        args.extend(["-loglevel".to_string(), "error".to_string()]);
        args.push(output_path.display().to_string());

        ctx.progress.report(5);
        run_tool(&self.ffmpeg_path, &args, &ctx.work_dir, ctx.timeout).await?;

        let output = ProcessorOutput::from_file(&output_path, filename)?;
        ctx.progress.report(100);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equalizer_gain_range() {
        assert_eq!(
            AudioEffectsProcessor::filter_string(AudioEffect::Equalizer, 0.5),
            "equalizer=f=1000:t=q:w=1:g=0.0"
        );
        assert_eq!(
            AudioEffectsProcessor::filter_string(AudioEffect::Equalizer, 1.0),
            "equalizer=f=1000:t=q:w=1:g=12.0"
        );
        assert_eq!(
            AudioEffectsProcessor::filter_string(AudioEffect::Equalizer, 0.0),
            "equalizer=f=1000:t=q:w=1:g=-12.0"
        );
    }

    #[test]
    fn test_reverb_uses_two_taps() {
        let filter = AudioEffectsProcessor::filter_string(AudioEffect::Reverb, 0.5);
        assert!(filter.starts_with("aecho=0.8:0.9:40|60:"));
    }

    #[test]
    fn test_noise_reduction_floor_scales() {
        let gentle = AudioEffectsProcessor::filter_string(AudioEffect::NoiseReduction, 0.0);
        let aggressive = AudioEffectsProcessor::filter_string(AudioEffect::NoiseReduction, 1.0);
        assert_eq!(gentle, "afftdn=nf=-20");
        assert_eq!(aggressive, "afftdn=nf=-50");
    }

    #[test]
    fn test_normalize_ignores_intensity() {
        let a = AudioEffectsProcessor::filter_string(AudioEffect::Normalize, 0.1);
        let b = AudioEffectsProcessor::filter_string(AudioEffect::Normalize, 0.9);
        assert_eq!(a, b);
    }

    #[test]
    fn test_bass_boost() {
        assert_eq!(
            AudioEffectsProcessor::filter_string(AudioEffect::BassBoost, 1.0),
            "bass=g=15.0"
        );
    }

    #[test]
    fn test_intensity_is_clamped() {
        let over = AudioEffectsProcessor::filter_string(AudioEffect::BassBoost, 7.0);
        assert_eq!(over, "bass=g=15.0");
    }
}
