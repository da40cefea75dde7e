//! # Converter Module
//!
//! The uniform `Converter` contract and the registry holding one handle per category.
//!
//! ## Responsibilities:
//! - `Converter`: async `convert(input, output, options)` implemented by every handle
//! - `ConverterRegistry`: built once per process, shared read-only by every job
//! - `MediaInfo`: what `info()` reports about a file
//!
//! ## Handles:
//! - `ImageConverter`: in-process with the `image` crate
//! - `DocumentConverter`: `lopdf` in-process, `qpdf`/LibreOffice/`pandoc`/`ocrmypdf` as tools
//! - `AudioConverter` / `VideoConverter`: `ffmpeg` and `ffprobe`
//!
//! A handle whose construction fails is left out of the registry; the registry itself
//! always builds. Archives never get a handle.
//!
//! ## Example:
//! ```rust,ignore
//! let registry = ConverterRegistry::from_context(&ToolContext::from_config(&config));
//! if let Some(converter) = registry.get(FileCategory::Audio) {
//!     converter.convert(&input, &output, &options).await?;
//! }
//! ```

pub mod audio;
pub mod document;
pub mod image;
mod probe;
pub mod video;

pub use self::audio::AudioConverter;
pub use self::document::{CompressionReport, DocumentConverter, DocumentOperations};
pub use self::image::ImageConverter;
pub use self::video::VideoConverter;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::category::{extension_of, FileCategory};
use crate::error::ConvertError;
use crate::options::ConversionOptions;
use crate::tools::ToolContext;

/// A handle converting files of one category
#[async_trait]
pub trait Converter: Send + Sync {
    /// Returns the name of this converter implementation
    fn name(&self) -> &str;

    /// The category of inputs this handle accepts
    fn category(&self) -> FileCategory;

    /// Output format identifiers (extensions), in display order
    fn supported_formats(&self) -> &[&'static str];

    fn supports_output(&self, format: &str) -> bool {
        let format = format.trim_start_matches('.').to_ascii_lowercase();
        self.supported_formats().iter().any(|f| *f == format)
    }

    /// Convert `input` into `output`, whose extension selects the target format.
    /// The output's parent directory already exists.
    async fn convert(&self, input: &Path, output: &Path, options: &ConversionOptions) -> Result<(), ConvertError>;

    /// Describe a file of this category
    async fn info(&self, path: &Path) -> Result<MediaInfo, ConvertError> {
        MediaInfo::basic(path, self.category()).await
    }
}

/// Information about a media file; fields that do not apply are absent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub category: Option<FileCategory>,
    pub format: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_transparency: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
}

impl MediaInfo {
    /// Size and extension only
    pub async fn basic(path: &Path, category: FileCategory) -> Result<Self, ConvertError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| ConvertError::InputMissing(path.to_path_buf()))?;

        Ok(Self {
            path: path.to_path_buf(),
            category: Some(category),
            format: extension_of(path),
            size_bytes: metadata.len(),
            ..Default::default()
        })
    }
}

/// Runs CPU-bound work on the blocking pool, re-raising its panics on this task
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, ConvertError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ConvertError> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(ConvertError::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))),
    }
}

/// The tool exited cleanly; make sure it actually wrote something
pub(crate) async fn ensure_written(output: &Path) -> Result<(), ConvertError> {
    match tokio::fs::metadata(output).await {
        Ok(metadata) if metadata.len() > 0 => Ok(()),
        Ok(_) => Err(ConvertError::OutputValidationFailed(format!("{} is empty", output.display()))),
        Err(_) => Err(ConvertError::OutputValidationFailed(format!("{} was not created", output.display()))),
    }
}

/// One converter handle per category
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<FileCategory, Arc<dyn Converter>>,
}

impl ConverterRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard handles; a handle that fails to build is skipped
    pub fn from_context(ctx: &ToolContext) -> Self {
        let mut registry = Self::new();

        registry.register_with(FileCategory::Image, || {
            Ok(Arc::new(ImageConverter::new(ctx.clone())?) as Arc<dyn Converter>)
        });
        registry.register_with(FileCategory::Document, || {
            Ok(Arc::new(DocumentConverter::new(ctx.clone())?) as Arc<dyn Converter>)
        });
        registry.register_with(FileCategory::Audio, || {
            Ok(Arc::new(AudioConverter::new(ctx.clone())?) as Arc<dyn Converter>)
        });
        registry.register_with(FileCategory::Video, || {
            Ok(Arc::new(VideoConverter::new(ctx.clone())?) as Arc<dyn Converter>)
        });

        registry
    }

    /// Register a handle under its own category, replacing any previous one
    pub fn register(&mut self, converter: Arc<dyn Converter>) {
        debug!("Registered {} converter for {} files", converter.name(), converter.category());
        self.converters.insert(converter.category(), converter);
    }

    /// Register the handle built by `build`, or leave `category` absent when it fails
    pub fn register_with<F>(&mut self, category: FileCategory, build: F) -> bool
    where
        F: FnOnce() -> Result<Arc<dyn Converter>, ConvertError>,
    {
        match build() {
            Ok(converter) if converter.category() == category => {
                self.register(converter);
                true
            }
            Ok(converter) => {
                warn!(
                    "{} converter handles {} files, not {}; skipped",
                    converter.name(),
                    converter.category(),
                    category
                );
                false
            }
            Err(e) => {
                warn!("No {} converter: {}", category, e);
                false
            }
        }
    }

    pub fn get(&self, category: FileCategory) -> Option<Arc<dyn Converter>> {
        self.converters.get(&category).cloned()
    }

    pub fn contains(&self, category: FileCategory) -> bool {
        self.converters.contains_key(&category)
    }

    /// Output formats of a category, empty when it has no handle
    pub fn get_supported_formats(&self, category: FileCategory) -> Vec<String> {
        self.converters
            .get(&category)
            .map(|c| c.supported_formats().iter().map(|f| f.to_string()).collect())
            .unwrap_or_default()
    }

    /// Category → output formats, omitting categories without a handle or formats
    pub fn supported_conversions(&self) -> BTreeMap<FileCategory, Vec<String>> {
        FileCategory::KNOWN
            .into_iter()
            .map(|category| (category, self.get_supported_formats(category)))
            .filter(|(_, formats)| !formats.is_empty())
            .collect()
    }
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self
            .converters
            .iter()
            .map(|(category, c)| format!("{}={}", category, c.name()))
            .collect();
        names.sort();
        f.debug_struct("ConverterRegistry").field("converters", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolTimeouts;
    use crate::testing::{RecordingRunner, StubConverter};
    use crate::tools::ResolvedTools;

    fn context() -> ToolContext {
        ToolContext::new(ResolvedTools::none(), Arc::new(RecordingRunner::new()), ToolTimeouts::default())
    }

    #[test]
    fn test_standard_registry_has_no_archive_handle() {
        let registry = ConverterRegistry::from_context(&context());
        assert!(registry.contains(FileCategory::Image));
        assert!(registry.contains(FileCategory::Document));
        assert!(registry.contains(FileCategory::Audio));
        assert!(registry.contains(FileCategory::Video));
        assert!(registry.get(FileCategory::Archive).is_none());
        assert!(registry.get_supported_formats(FileCategory::Archive).is_empty());
    }

    #[test]
    fn test_failed_construction_leaves_category_absent() {
        let mut registry = ConverterRegistry::new();
        let added = registry.register_with(FileCategory::Video, || {
            Err(ConvertError::ExternalToolUnavailable("ffmpeg".into()))
        });
        assert!(!added);
        assert!(registry.get(FileCategory::Video).is_none());
        assert!(registry.supported_conversions().is_empty());
    }

    #[test]
    fn test_bad_timeouts_fail_construction() {
        let mut timeouts = ToolTimeouts::default();
        timeouts.audio_secs = 0;
        let ctx = ToolContext::new(ResolvedTools::none(), Arc::new(RecordingRunner::new()), timeouts);
        let registry = ConverterRegistry::from_context(&ctx);
        assert!(!registry.contains(FileCategory::Audio));
        assert!(registry.contains(FileCategory::Video));
    }

    #[test]
    fn test_mismatched_category_is_rejected() {
        let mut registry = ConverterRegistry::new();
        let stub = Arc::new(StubConverter::new(FileCategory::Audio, &["mp3"]));
        assert!(!registry.register_with(FileCategory::Image, || Ok(stub as Arc<dyn Converter>)));
        assert!(registry.get(FileCategory::Image).is_none());
    }

    #[test]
    fn test_supported_conversions() {
        let registry = ConverterRegistry::from_context(&context());
        let conversions = registry.supported_conversions();
        assert_eq!(conversions.len(), 4);
        assert!(conversions[&FileCategory::Image].contains(&"jpg".to_string()));
        assert!(conversions[&FileCategory::Audio].contains(&"flac".to_string()));
        assert!(conversions[&FileCategory::Video].contains(&"webm".to_string()));
        assert!(conversions[&FileCategory::Document].contains(&"pdf".to_string()));
    }

    #[test]
    fn test_ensure_written() {
        let dir = tempfile::TempDir::new().unwrap();
        let empty = dir.path().join("empty.mp3");
        std::fs::write(&empty, b"").unwrap();
        let full = dir.path().join("full.mp3");
        std::fs::write(&full, b"ID3").unwrap();

        tokio_test::block_on(async {
            assert!(ensure_written(&full).await.is_ok());
            let err = ensure_written(&empty).await.unwrap_err();
            assert!(err.to_string().contains("is empty"));
            let err = ensure_written(&dir.path().join("absent.mp3")).await.unwrap_err();
            assert!(err.to_string().contains("was not created"));
        });
    }

    #[test]
    fn test_supports_output_is_case_insensitive() {
        let stub = StubConverter::new(FileCategory::Image, &["jpg", "png"]);
        assert!(stub.supports_output("JPG"));
        assert!(stub.supports_output(".png"));
        assert!(!stub.supports_output("gif"));
    }
}
