//! `ffprobe` invocation and JSON parsing shared by the audio and video handles.

use serde::Deserialize;
use std::path::Path;

use super::MediaInfo;
use crate::args;
use crate::category::FileCategory;
use crate::error::ConvertError;
use crate::tools::{Tool, ToolContext};
use crate::utils::path_arg;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: String,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: String,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

/// Run ffprobe on `path` and describe it
pub(crate) async fn probe(ctx: &ToolContext, path: &Path, category: FileCategory) -> Result<MediaInfo, ConvertError> {
    let ffprobe = ctx.require(Tool::Ffprobe)?;
    if !path.is_file() {
        return Err(ConvertError::InputMissing(path.to_path_buf()));
    }

    let args = args![
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
        path_arg(path)
    ];
    let output = ctx.runner.run_checked(ffprobe, &args, ctx.timeouts.probe()).await?;
    parse_probe_output(path, category, &output.stdout_text())
}

pub(crate) fn parse_probe_output(path: &Path, category: FileCategory, output: &str) -> Result<MediaInfo, ConvertError> {
    let probe: ProbeOutput = serde_json::from_str(output)
        .map_err(|e| ConvertError::tool_failed("ffprobe", format!("unreadable output: {}", e)))?;

    let audio = probe.streams.iter().find(|s| s.codec_type == "audio");
    let video = probe.streams.iter().find(|s| s.codec_type == "video");

    Ok(MediaInfo {
        path: path.to_path_buf(),
        category: Some(category),
        format: probe
            .format
            .format_name
            .split(',')
            .next()
            .unwrap_or("unknown")
            .to_string(),
        size_bytes: probe.format.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
        duration_secs: probe.format.duration.as_deref().and_then(|d| d.parse().ok()),
        bitrate: probe.format.bit_rate.as_deref().and_then(|b| b.parse().ok()),
        audio_codec: audio.and_then(|s| s.codec_name.clone()),
        sample_rate: audio.and_then(|s| s.sample_rate.as_deref()).and_then(|r| r.parse().ok()),
        channels: audio.and_then(|s| s.channels),
        video_codec: video.and_then(|s| s.codec_name.clone()),
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        fps: video.and_then(|s| s.r_frame_rate.as_deref()).and_then(parse_frame_rate),
        ..Default::default()
    })
}

/// `24000/1001` or `30`
fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den > 0.0).then(|| num / den)
        }
        None => rate.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080, "r_frame_rate": "30000/1001"},
            {"codec_type": "audio", "codec_name": "aac", "sample_rate": "48000", "channels": 2}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "12.5", "size": "1048576", "bit_rate": "671088"}
    }"#;

    #[test]
    fn test_parse_probe_output() {
        let info = parse_probe_output(Path::new("clip.mp4"), FileCategory::Video, SAMPLE).unwrap();
        assert_eq!(info.format, "mov");
        assert_eq!(info.duration_secs, Some(12.5));
        assert_eq!(info.size_bytes, 1_048_576);
        assert_eq!(info.bitrate, Some(671_088));
        assert_eq!(info.video_codec.as_deref(), Some("h264"));
        assert_eq!(info.audio_codec.as_deref(), Some("aac"));
        assert_eq!((info.width, info.height), (Some(1920), Some(1080)));
        assert_eq!(info.sample_rate, Some(48_000));
        assert_eq!(info.channels, Some(2));
        assert!((info.fps.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_invalid_output() {
        let err = parse_probe_output(Path::new("x.mp3"), FileCategory::Audio, "not json").unwrap_err();
        assert!(matches!(err, ConvertError::ExternalToolFailed { .. }));
    }

    #[test]
    fn test_frame_rate() {
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("30/0"), None);
    }
}
