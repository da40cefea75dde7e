//! # Conversion Options Module
//!
//! Typed, per-category option structures passed to every converter.
//!
//! ## Responsibilities:
//! - `ConversionOptions` groups `ImageOptions`, `DocumentOptions`, `AudioOptions` and `VideoOptions`
//! - Every structure has explicit defaults and rejects unknown keys when deserialised
//! - `validate()` checks ranges before a batch starts, so a bad value fails once and not per file
//! - Small value types parsed from CLI text: `Dimensions` (`WxH`), `Resolution`, `PageRange`
//!
//! ## Policy:
//! A batch shares one `ConversionOptions` across mixed categories. A handle reads only
//! its own section and ignores the others.
//!
//! ## Example:
//! ```rust
//! use fileforge::options::{ConversionOptions, Dimensions};
//!
//! let mut options = ConversionOptions::default();
//! options.image.quality = 85;
//! options.image.resize = Some(Dimensions::new(1920, 1080));
//! assert!(options.validate().is_ok());
//! ```

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConvertError;

/// Options shared by every job of a conversion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionOptions {
    pub image: ImageOptions,
    pub document: DocumentOptions,
    pub audio: AudioOptions,
    pub video: VideoOptions,
}

impl ConversionOptions {
    pub fn validate(&self) -> Result<(), ConvertError> {
        self.image.validate()?;
        self.document.validate()?;
        self.audio.validate()?;
        self.video.validate()
    }
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

/// How a resize handles the aspect ratio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Fit inside the box, keeping the aspect ratio
    #[default]
    Fit,
    /// Cover the box and crop the center
    Fill,
    /// Force the exact dimensions
    Stretch,
}

/// Resampling filter used when resizing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeAlgorithm {
    #[default]
    Lanczos,
    CatmullRom,
    Triangle,
    Gaussian,
    Nearest,
}

impl ResizeAlgorithm {
    pub fn filter_type(&self) -> FilterType {
        match self {
            ResizeAlgorithm::Lanczos => FilterType::Lanczos3,
            ResizeAlgorithm::CatmullRom => FilterType::CatmullRom,
            ResizeAlgorithm::Triangle => FilterType::Triangle,
            ResizeAlgorithm::Gaussian => FilterType::Gaussian,
            ResizeAlgorithm::Nearest => FilterType::Nearest,
        }
    }
}

impl FromStr for ResizeAlgorithm {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lanczos" => Ok(Self::Lanczos),
            "catmullrom" | "catrom" => Ok(Self::CatmullRom),
            "triangle" | "bilinear" => Ok(Self::Triangle),
            "gaussian" => Ok(Self::Gaussian),
            "nearest" | "point" => Ok(Self::Nearest),
            other => Err(ConvertError::invalid_options(format!("unknown resize filter '{}'", other))),
        }
    }
}

/// Width and height in pixels, written `WxH`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl FromStr for Dimensions {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConvertError::invalid_options(format!("expected WIDTHxHEIGHT, got '{}'", s));
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Options for the image handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageOptions {
    /// JPEG quality (1-100)
    pub quality: u8,
    pub resize: Option<Dimensions>,
    pub resize_mode: ResizeMode,
    pub resize_filter: ResizeAlgorithm,
    /// Longest side limit, applied after `resize`
    pub max_size: Option<u32>,
    /// Clockwise rotation in degrees, multiple of 90
    pub rotate: Option<i32>,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// Enhancement factors, 1.0 leaves the image unchanged
    pub enhance_brightness: Option<f32>,
    pub enhance_contrast: Option<f32>,
    pub enhance_saturation: Option<f32>,
    pub enhance_sharpness: Option<f32>,
    /// Gaussian blur sigma
    pub blur: Option<f32>,
    pub grayscale: bool,
    pub preserve_metadata: bool,
    /// Re-open the written file and check its dimensions
    pub verify_output: bool,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            quality: 90,
            resize: None,
            resize_mode: ResizeMode::Fit,
            resize_filter: ResizeAlgorithm::Lanczos,
            max_size: None,
            rotate: None,
            flip_horizontal: false,
            flip_vertical: false,
            enhance_brightness: None,
            enhance_contrast: None,
            enhance_saturation: None,
            enhance_sharpness: None,
            blur: None,
            grayscale: false,
            preserve_metadata: true,
            verify_output: true,
        }
    }
}

impl ImageOptions {
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.quality == 0 || self.quality > 100 {
            return Err(ConvertError::invalid_options("image quality must be between 1 and 100"));
        }
        if let Some(degrees) = self.rotate {
            if degrees % 90 != 0 {
                return Err(ConvertError::invalid_options(format!(
                    "rotation must be a multiple of 90 degrees, got {}",
                    degrees
                )));
            }
        }
        if self.max_size == Some(0) {
            return Err(ConvertError::invalid_options("max_size must be greater than 0"));
        }
        let factors = [
            ("brightness", self.enhance_brightness),
            ("contrast", self.enhance_contrast),
            ("saturation", self.enhance_saturation),
            ("sharpness", self.enhance_sharpness),
            ("blur", self.blur),
        ];
        for (name, value) in factors {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ConvertError::invalid_options(format!(
                        "{} must be a non-negative number",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// 1-based page selection such as `1-5,10,15-20`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PageRange {
    spans: Vec<(u32, u32)>,
}

impl PageRange {
    /// Selected page numbers (1-based), sorted, de-duplicated and clamped to `page_count`
    pub fn resolve(&self, page_count: u32) -> Vec<u32> {
        let mut pages: Vec<u32> = self
            .spans
            .iter()
            .flat_map(|&(start, end)| start..=end.min(page_count))
            .collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

impl FromStr for PageRange {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |part: &str| ConvertError::invalid_options(format!("invalid page range '{}'", part));
        let mut spans = Vec::new();

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let span = match part.split_once('-') {
                Some((start, end)) => {
                    let start: u32 = start.trim().parse().map_err(|_| invalid(part))?;
                    let end: u32 = end.trim().parse().map_err(|_| invalid(part))?;
                    (start, end)
                }
                None => {
                    let page: u32 = part.parse().map_err(|_| invalid(part))?;
                    (page, page)
                }
            };
            if span.0 == 0 || span.1 < span.0 {
                return Err(invalid(part));
            }
            spans.push(span);
        }

        if spans.is_empty() {
            return Err(invalid(s));
        }
        Ok(Self { spans })
    }
}

impl TryFrom<String> for PageRange {
    type Error = ConvertError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PageRange> for String {
    fn from(range: PageRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .spans
            .iter()
            .map(|&(start, end)| {
                if start == end {
                    start.to_string()
                } else {
                    format!("{}-{}", start, end)
                }
            })
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// PDF compression effort
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl FromStr for CompressionLevel {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(ConvertError::invalid_options(format!("unknown compression level '{}'", other))),
        }
    }
}

/// Options for the document handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DocumentOptions {
    /// Password of an encrypted input PDF
    pub password: Option<String>,
    pub pages: Option<PageRange>,
    /// Run OCR on a scanned input PDF first
    pub ocr: bool,
    pub compression: CompressionLevel,
    /// Watermark font size in points
    pub font_size: f32,
    /// Watermark opacity (0-1)
    pub opacity: f32,
    /// Watermark rotation in degrees
    pub rotation: f32,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        Self {
            password: None,
            pages: None,
            ocr: false,
            compression: CompressionLevel::Medium,
            font_size: 40.0,
            opacity: 0.3,
            rotation: 45.0,
        }
    }
}

impl DocumentOptions {
    pub fn validate(&self) -> Result<(), ConvertError> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ConvertError::invalid_options("opacity must be between 0 and 1"));
        }
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            return Err(ConvertError::invalid_options("font size must be greater than 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

/// Audio quality preset or an explicit bitrate such as `256k`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AudioQuality {
    Low,
    #[default]
    Medium,
    High,
    Lossless,
    Bitrate(String),
}

impl FromStr for AudioQuality {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "lossless" => Ok(Self::Lossless),
            _ if is_bitrate(&lower) => Ok(Self::Bitrate(lower)),
            _ => Err(ConvertError::invalid_options(format!(
                "audio quality must be low, medium, high, lossless or a bitrate like 192k, got '{}'",
                s
            ))),
        }
    }
}

impl TryFrom<String> for AudioQuality {
    type Error = ConvertError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AudioQuality> for String {
    fn from(quality: AudioQuality) -> Self {
        match quality {
            AudioQuality::Low => "low".to_string(),
            AudioQuality::Medium => "medium".to_string(),
            AudioQuality::High => "high".to_string(),
            AudioQuality::Lossless => "lossless".to_string(),
            AudioQuality::Bitrate(rate) => rate,
        }
    }
}

/// `192k`, `1.5M` or a plain number of bits per second
fn is_bitrate(s: &str) -> bool {
    let digits = s.strip_suffix(['k', 'm']).unwrap_or(s);
    !digits.is_empty() && digits.parse::<f64>().map(|v| v > 0.0).unwrap_or(false)
}

/// Options for the audio handle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioOptions {
    pub quality: AudioQuality,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    /// Volume multiplier, 1.0 leaves it unchanged
    pub volume: Option<f32>,
    /// Seconds from the start of the input
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    pub fade_in: Option<f64>,
    pub fade_out: Option<f64>,
    /// EBU R128 loudness normalisation
    pub normalize: bool,
    pub preserve_metadata: bool,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            quality: AudioQuality::Medium,
            sample_rate: None,
            channels: None,
            volume: None,
            start_time: None,
            duration: None,
            fade_in: None,
            fade_out: None,
            normalize: false,
            preserve_metadata: true,
        }
    }
}

impl AudioOptions {
    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.sample_rate == Some(0) {
            return Err(ConvertError::invalid_options("sample rate must be greater than 0"));
        }
        if self.channels == Some(0) {
            return Err(ConvertError::invalid_options("channel count must be greater than 0"));
        }
        validate_times(&[
            ("start_time", self.start_time),
            ("duration", self.duration),
            ("fade_in", self.fade_in),
            ("fade_out", self.fade_out),
        ])?;
        if let Some(volume) = self.volume {
            if !volume.is_finite() || volume < 0.0 {
                return Err(ConvertError::invalid_options("volume must be a non-negative number"));
            }
        }
        if self.fade_out.is_some() && self.duration.is_none() {
            return Err(ConvertError::invalid_options("fade_out requires duration"));
        }
        Ok(())
    }
}

fn validate_times(values: &[(&str, Option<f64>)]) -> Result<(), ConvertError> {
    for (name, value) in values {
        if let Some(v) = value {
            if !v.is_finite() || *v < 0.0 {
                return Err(ConvertError::invalid_options(format!("{} must be a non-negative number of seconds", name)));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

/// Video quality preset or an explicit CRF (0-51)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QualityValue", into = "QualityValue")]
pub enum VideoQuality {
    UltraLow,
    Low,
    #[default]
    Medium,
    High,
    UltraHigh,
    Crf(u8),
}

impl VideoQuality {
    /// CRF value and x264 preset of this quality
    pub fn encoder_settings(&self) -> (u8, &'static str) {
        match self {
            VideoQuality::UltraLow => (32, "ultrafast"),
            VideoQuality::Low => (28, "fast"),
            VideoQuality::Medium => (23, "medium"),
            VideoQuality::High => (18, "slow"),
            VideoQuality::UltraHigh => (15, "slower"),
            VideoQuality::Crf(crf) => (*crf, "medium"),
        }
    }
}

impl FromStr for VideoQuality {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ultra_low" => Ok(Self::UltraLow),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "ultra_high" => Ok(Self::UltraHigh),
            other => other
                .strip_prefix("crf")
                .unwrap_or(other)
                .trim_start_matches([':', '='])
                .parse::<u8>()
                .map(Self::Crf)
                .map_err(|_| ConvertError::invalid_options(format!("unknown video quality '{}'", s))),
        }
    }
}

/// Wire form of `VideoQuality`: a preset name or a bare CRF number
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QualityValue {
    Crf(u8),
    Name(String),
}

impl TryFrom<QualityValue> for VideoQuality {
    type Error = ConvertError;

    fn try_from(value: QualityValue) -> Result<Self, Self::Error> {
        match value {
            QualityValue::Crf(crf) => Ok(Self::Crf(crf)),
            QualityValue::Name(name) => name.parse(),
        }
    }
}

impl From<VideoQuality> for QualityValue {
    fn from(quality: VideoQuality) -> Self {
        let name = match quality {
            VideoQuality::UltraLow => "ultra_low",
            VideoQuality::Low => "low",
            VideoQuality::Medium => "medium",
            VideoQuality::High => "high",
            VideoQuality::UltraHigh => "ultra_high",
            VideoQuality::Crf(crf) => return QualityValue::Crf(crf),
        };
        QualityValue::Name(name.to_string())
    }
}

/// Output frame size: a named preset or an explicit `WxH`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    P480,
    P720,
    P1080,
    P1440,
    K4,
    Custom(Dimensions),
}

impl Resolution {
    pub fn dimensions(&self) -> Dimensions {
        match self {
            Resolution::P480 => Dimensions::new(854, 480),
            Resolution::P720 => Dimensions::new(1280, 720),
            Resolution::P1080 => Dimensions::new(1920, 1080),
            Resolution::P1440 => Dimensions::new(2560, 1440),
            Resolution::K4 => Dimensions::new(3840, 2160),
            Resolution::Custom(dimensions) => *dimensions,
        }
    }
}

impl FromStr for Resolution {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "480p" => Ok(Self::P480),
            "720p" => Ok(Self::P720),
            "1080p" => Ok(Self::P1080),
            "1440p" => Ok(Self::P1440),
            "4k" | "2160p" => Ok(Self::K4),
            other => other.parse().map(Self::Custom),
        }
    }
}

impl TryFrom<String> for Resolution {
    type Error = ConvertError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::P480 => "480p".to_string(),
            Resolution::P720 => "720p".to_string(),
            Resolution::P1080 => "1080p".to_string(),
            Resolution::P1440 => "1440p".to_string(),
            Resolution::K4 => "4k".to_string(),
            Resolution::Custom(dimensions) => dimensions.to_string(),
        }
    }
}

/// Options for the video handle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoOptions {
    pub quality: VideoQuality,
    pub resolution: Option<Resolution>,
    pub fps: Option<f32>,
    /// Overrides the codec chosen for the container
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    /// Target video bitrate, replaces the CRF
    pub bitrate: Option<String>,
    pub audio_bitrate: Option<String>,
    /// Overrides the encoder preset of the quality
    pub preset: Option<String>,
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    pub remove_audio: bool,
}

impl VideoOptions {
    pub fn validate(&self) -> Result<(), ConvertError> {
        if let VideoQuality::Crf(crf) = self.quality {
            if crf > 51 {
                return Err(ConvertError::invalid_options("video CRF must be between 0 and 51"));
            }
        }
        if let Some(fps) = self.fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(ConvertError::invalid_options("fps must be greater than 0"));
            }
        }
        for (name, value) in [("bitrate", &self.bitrate), ("audio_bitrate", &self.audio_bitrate)] {
            if let Some(rate) = value {
                if !is_bitrate(&rate.to_ascii_lowercase()) {
                    return Err(ConvertError::invalid_options(format!("invalid {} '{}'", name, rate)));
                }
            }
        }
        validate_times(&[("start_time", self.start_time), ("duration", self.duration)])
    }
}
