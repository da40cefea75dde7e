//! # Video Converter
//!
//! Re-encodes video with `ffmpeg` and describes files with `ffprobe`.
//!
//! ## Containers:
//! | Format | Video | Audio |
//! |---|---|---|
//! | mp4, mkv, mov | libx264 | aac |
//! | avi | libx264 | libmp3lame |
//! | wmv | wmv2 | wmav2 |
//! | webm | libvpx-vp9 | libopus |
//! | 3gp | h263 | libopencore_amrnb |
//! | flv | flv | libmp3lame |
//!
//! Quality presets map to a CRF and an encoder preset (`VideoQuality::encoder_settings`).
//! The CRF only applies to encoders that understand it; an explicit bitrate replaces it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{ensure_written, probe, Converter, MediaInfo};
use crate::args;
use crate::category::{extension_of, FileCategory};
use crate::error::ConvertError;
use crate::options::{ConversionOptions, VideoOptions};
use crate::tools::{Tool, ToolContext};
use crate::utils::path_arg;

const OUTPUT_FORMATS: &[&str] = &["mp4", "avi", "mkv", "mov", "wmv", "webm", "3gp", "flv"];

/// Video and audio codec of a container
fn codecs_for(format: &str) -> Option<(&'static str, &'static str)> {
    match format {
        "mp4" | "mkv" | "mov" => Some(("libx264", "aac")),
        "avi" => Some(("libx264", "libmp3lame")),
        "wmv" => Some(("wmv2", "wmav2")),
        "webm" => Some(("libvpx-vp9", "libopus")),
        "3gp" => Some(("h263", "libopencore_amrnb")),
        "flv" => Some(("flv", "libmp3lame")),
        _ => None,
    }
}

fn supports_crf(codec: &str) -> bool {
    matches!(codec, "libx264" | "libx265" | "libvpx-vp9")
}

fn supports_preset(codec: &str) -> bool {
    matches!(codec, "libx264" | "libx265")
}

/// Video handle backed by ffmpeg
pub struct VideoConverter {
    ctx: ToolContext,
    ffmpeg: Option<PathBuf>,
}

impl VideoConverter {
    pub fn new(ctx: ToolContext) -> Result<Self, ConvertError> {
        if ctx.timeouts.video_secs == 0 {
            return Err(ConvertError::invalid_options("video timeout must be greater than 0"));
        }

        let ffmpeg = ctx.tools.get(Tool::Ffmpeg).map(Path::to_path_buf);
        if ffmpeg.is_none() {
            warn!("FFmpeg not found, video conversion unavailable");
        }

        Ok(Self { ctx, ffmpeg })
    }

    pub fn is_available(&self) -> bool {
        self.ffmpeg.is_some()
    }
}

pub(crate) fn build_args(input: &Path, output: &Path, format: &str, options: &VideoOptions) -> Vec<String> {
    let (default_video, default_audio) = codecs_for(format).unwrap_or(("libx264", "aac"));
    let video_codec = options.video_codec.as_deref().unwrap_or(default_video);
    let audio_codec = options.audio_codec.as_deref().unwrap_or(default_audio);
    let (crf, preset) = options.quality.encoder_settings();

    let mut args = args!["-y", "-i", path_arg(input)];

    if let Some(start) = options.start_time {
        args.extend(args!["-ss", start]);
    }
    if let Some(duration) = options.duration {
        args.extend(args!["-t", duration]);
    }

    args.extend(args!["-c:v", video_codec]);

    match options.bitrate {
        Some(ref bitrate) => args.extend(args!["-b:v", bitrate]),
        None if supports_crf(video_codec) => {
            args.extend(args!["-crf", crf]);
            // VP9 is only constant-quality with a zero target bitrate
            if video_codec == "libvpx-vp9" {
                args.extend(args!["-b:v", "0"]);
            }
        }
        None => {}
    }

    if supports_preset(video_codec) {
        args.extend(args!["-preset", options.preset.as_deref().unwrap_or(preset)]);
    }

    if let Some(resolution) = options.resolution {
        let size = resolution.dimensions();
        args.extend(args!["-vf", format!("scale={}:{}:flags=lanczos", size.width, size.height)]);
    }
    if let Some(fps) = options.fps {
        args.extend(args!["-r", fps]);
    }

    if options.remove_audio {
        args.push("-an".to_string());
    } else {
        args.extend(args!["-c:a", audio_codec]);
        if let Some(ref rate) = options.audio_bitrate {
            args.extend(args!["-b:a", rate]);
        }
    }

    args.extend(args!["-loglevel", "error", path_arg(output)]);
    args
}

#[async_trait]
impl Converter for VideoConverter {
    fn name(&self) -> &str {
        "video"
    }

    fn category(&self) -> FileCategory {
        FileCategory::Video
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
        if codecs_for(&format).is_none() {
            return Err(ConvertError::UnsupportedFormat(format!("video output .{}", format)));
        }
        options.video.validate()?;

        let args = build_args(input, output, &format, &options.video);
        debug!("Converting video {} -> {}", input.display(), output.display());

        self.ctx.runner.run_checked(ffmpeg, &args, self.ctx.timeouts.video()).await?;
        ensure_written(output).await
    }

    async fn info(&self, path: &Path) -> Result<MediaInfo, ConvertError> {
        probe::probe(&self.ctx, path, FileCategory::Video).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolTimeouts;
    use crate::error::ErrorKind;
    use crate::options::{Resolution, VideoQuality};
    use crate::testing::RecordingRunner;
    use crate::tools::ResolvedTools;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn converter(tools: ResolvedTools, runner: Arc<RecordingRunner>) -> VideoConverter {
        VideoConverter::new(ToolContext::new(tools, runner, ToolTimeouts::default())).unwrap()
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_fails_without_spawning() {
        let runner = Arc::new(RecordingRunner::new());
        let video = converter(ResolvedTools::none(), runner.clone());

        let err = video
            .convert(Path::new("clip.avi"), Path::new("clip.mp4"), &ConversionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolUnavailable);

        let err = video.info(Path::new("clip.avi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolUnavailable);
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn test_zero_timeout_fails_construction() {
        let mut timeouts = ToolTimeouts::default();
        timeouts.video_secs = 0;
        let ctx = ToolContext::new(ResolvedTools::none(), Arc::new(RecordingRunner::new()), timeouts);
        assert!(VideoConverter::new(ctx).is_err());
    }

    #[test]
    fn test_mp4_defaults() {
        let args = build_args(Path::new("in.avi"), Path::new("out.mp4"), "mp4", &VideoOptions::default()).join(" ");
        assert_eq!(
            args,
            "-y -i in.avi -c:v libx264 -crf 23 -preset medium -c:a aac -loglevel error out.mp4"
        );
    }

    #[test]
    fn test_webm_is_constant_quality() {
        let options = VideoOptions {
            quality: VideoQuality::High,
            ..Default::default()
        };
        let args = build_args(Path::new("in.mp4"), Path::new("out.webm"), "webm", &options).join(" ");
        assert!(args.contains("-c:v libvpx-vp9 -crf 18 -b:v 0"));
        assert!(!args.contains("-preset"));
        assert!(args.contains("-c:a libopus"));
    }

    #[test]
    fn test_overrides() {
        let options = VideoOptions {
            resolution: Some(Resolution::P720),
            fps: Some(30.0),
            bitrate: Some("2M".into()),
            preset: Some("veryfast".into()),
            start_time: Some(5.0),
            duration: Some(10.0),
            remove_audio: true,
            ..Default::default()
        };
        let args = build_args(Path::new("in.mov"), Path::new("out.mkv"), "mkv", &options).join(" ");
        assert!(args.contains("-ss 5 -t 10"));
        assert!(args.contains("-b:v 2M"));
        assert!(!args.contains("-crf"));
        assert!(args.contains("-preset veryfast"));
        assert!(args.contains("-vf scale=1280:720:flags=lanczos"));
        assert!(args.contains("-r 30"));
        assert!(args.contains("-an"));
        assert!(!args.contains("-c:a"));
    }

    #[tokio::test]
    async fn test_ffmpeg_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.mov");
        std::fs::write(&input, b"moov").unwrap();

        let runner = Arc::new(RecordingRunner::new().failing("Invalid data found when processing input"));
        let tools = ResolvedTools::none().with(Tool::Ffmpeg, "/usr/bin/ffmpeg");
        let err = converter(tools, runner.clone())
            .convert(&input, &dir.path().join("clip.mp4"), &ConversionOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExternalToolFailed);
        assert!(err.to_string().contains("Invalid data"));
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_converts_with_stub_runner() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.mov");
        let output = dir.path().join("clip.flv");
        std::fs::write(&input, b"moov").unwrap();

        let runner = Arc::new(RecordingRunner::new().writing_output());
        let tools = ResolvedTools::none().with(Tool::Ffmpeg, "/usr/bin/ffmpeg");
        converter(tools, runner.clone())
            .convert(&input, &output, &ConversionOptions::default())
            .await
            .unwrap();

        assert!(output.exists());
        assert!(runner.calls()[0].args.join(" ").contains("-c:v flv"));
    }
}
