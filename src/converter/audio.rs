//! # Audio Converter
//!
//! Transcodes audio with `ffmpeg` and describes files with `ffprobe`.
//!
//! ## Output formats:
//! | Format | Codec |
//! |---|---|
//! | mp3 | libmp3lame |
//! | wav | pcm_s16le |
//! | flac | flac |
//! | aac, m4a | aac |
//! | ogg | libvorbis |
//! | opus | libopus |
//! | aiff | pcm_s16be |
//!
//! ## Quality presets (bitrate):
//! - **low**: mp3 128k, aac 96k, vorbis/opus 128k
//! - **medium**: mp3 192k, aac 128k, vorbis/opus 192k
//! - **high**: mp3 320k, aac 256k, vorbis/opus 320k
//! - **lossless**: no bitrate, the codec default
//!
//! `ffmpeg` is looked up once when the handle is built. Without it every `convert`
//! fails with `ExternalToolUnavailable` before any process is spawned.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{ensure_written, probe, Converter, MediaInfo};
use crate::args;
use crate::category::{extension_of, FileCategory};
use crate::error::ConvertError;
use crate::options::{AudioOptions, AudioQuality, ConversionOptions};
use crate::tools::{Tool, ToolContext};
use crate::utils::path_arg;

const OUTPUT_FORMATS: &[&str] = &["mp3", "wav", "flac", "aac", "ogg", "m4a", "opus", "aiff"];

/// Audio handle backed by ffmpeg
pub struct AudioConverter {
    ctx: ToolContext,
    ffmpeg: Option<PathBuf>,
}

impl AudioConverter {
    pub fn new(ctx: ToolContext) -> Result<Self, ConvertError> {
        if ctx.timeouts.audio_secs == 0 {
            return Err(ConvertError::invalid_options("audio timeout must be greater than 0"));
        }

        let ffmpeg = ctx.tools.get(Tool::Ffmpeg).map(Path::to_path_buf);
        if ffmpeg.is_none() {
            warn!("FFmpeg not found, audio conversion unavailable");
        }

        Ok(Self { ctx, ffmpeg })
    }

    pub fn is_available(&self) -> bool {
        self.ffmpeg.is_some()
    }
}

fn codec_for(format: &str) -> Option<&'static str> {
    match format {
        "mp3" => Some("libmp3lame"),
        "wav" => Some("pcm_s16le"),
        "flac" => Some("flac"),
        "aac" | "m4a" => Some("aac"),
        "ogg" => Some("libvorbis"),
        "opus" => Some("libopus"),
        "aiff" => Some("pcm_s16be"),
        _ => None,
    }
}

/// Bitrate of a preset for the given output format
fn preset_bitrate(quality: &AudioQuality, format: &str) -> Option<String> {
    let family = match format {
        "mp3" => 0,
        "aac" | "m4a" => 1,
        "ogg" | "opus" => 2,
        _ => return None,
    };
    let table: [&str; 3] = match quality {
        AudioQuality::Low => ["128k", "96k", "128k"],
        AudioQuality::Medium => ["192k", "128k", "192k"],
        AudioQuality::High => ["320k", "256k", "320k"],
        AudioQuality::Lossless => return None,
        AudioQuality::Bitrate(rate) => return Some(rate.clone()),
    };
    Some(table[family].to_string())
}

/// ffmpeg arguments for one audio conversion
pub(crate) fn build_args(input: &Path, output: &Path, format: &str, codec: &str, options: &AudioOptions) -> Vec<String> {
    let mut args = args!["-y", "-i", path_arg(input)];

    if let Some(start) = options.start_time {
        args.extend(args!["-ss", start]);
    }
    if let Some(duration) = options.duration {
        args.extend(args!["-t", duration]);
    }

    args.extend(args!["-vn", "-c:a", codec]);

    if let Some(bitrate) = preset_bitrate(&options.quality, format) {
        args.extend(args!["-b:a", bitrate]);
    }
    if let Some(rate) = options.sample_rate {
        args.extend(args!["-ar", rate]);
    }
    if let Some(channels) = options.channels {
        args.extend(args!["-ac", channels]);
    }

    let mut filters = Vec::new();
    if let Some(volume) = options.volume {
        filters.push(format!("volume={}", volume));
    }
    if let Some(fade_in) = options.fade_in {
        filters.push(format!("afade=in:st=0:d={}", fade_in));
    }
    if let (Some(fade_out), Some(duration)) = (options.fade_out, options.duration) {
        let start = (duration - fade_out).max(0.0);
        filters.push(format!("afade=out:st={}:d={}", start, fade_out));
    }
    if options.normalize {
        filters.push("loudnorm".to_string());
    }
    if !filters.is_empty() {
        args.extend(args!["-af", filters.join(",")]);
    }

    if !options.preserve_metadata {
        args.extend(args!["-map_metadata", "-1"]);
    }

    args.extend(args!["-loglevel", "error", path_arg(output)]);
    args
}

#[async_trait]
impl Converter for AudioConverter {
    fn name(&self) -> &str {
        "audio"
    }

    fn category(&self) -> FileCategory {
        FileCategory::Audio
    }

    fn supported_formats(&self) -> &[&'static str] {
        OUTPUT_FORMATS
    }

    async fn convert(&self, input: &Path, output: &Path, options: &ConversionOptions) -> Result<(), ConvertError> {
        let ffmpeg = self
            .ffmpeg
            .as_deref()
            .ok_or_else(|| ConvertError::ExternalToolUnavailable("ffmpeg".to_string()))?;

        let format = extension_of(output);
        let codec = codec_for(&format).ok_or_else(|| ConvertError::UnsupportedFormat(format!("audio output .{}", format)))?;
        options.audio.validate()?;

        let args = build_args(input, output, &format, codec, &options.audio);
        debug!("Converting audio {} -> {} ({})", input.display(), output.display(), codec);

        self.ctx.runner.run_checked(ffmpeg, &args, self.ctx.timeouts.audio()).await?;
        ensure_written(output).await
    }

    async fn info(&self, path: &Path) -> Result<MediaInfo, ConvertError> {
        probe::probe(&self.ctx, path, FileCategory::Audio).await
    }
}
