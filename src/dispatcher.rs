//! # Single-File Dispatcher
//!
//! Routes one input file to the converter handle of its category and turns the
//! outcome into a `ConversionResult`.
//!
//! ## Order of checks:
//! 1. the input must be an existing file (`InputMissing`)
//! 2. the input must classify into a known category (`UnsupportedFormat`)
//! 3. the category must have a handle (`NoConverterAvailable`)
//! 4. the handle must list the output extension (`UnsupportedFormat`)
//! 5. the output directory is created, then the handle runs
//!
//! No error escapes `convert`: every failure, including the handle's own, comes back
//! as a failed result. Nothing is retried.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::category::{classify, extension_of, FileCategory};
use crate::converter::ConverterRegistry;
use crate::error::ConvertError;
use crate::job::{ConversionJob, ConversionResult};
use crate::options::ConversionOptions;

/// Converts single files through a shared registry
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ConverterRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConverterRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConverterRegistry> {
        &self.registry
    }

    /// Convert `input` into `output`; never fails, the result carries the outcome
    pub async fn convert(&self, input: &Path, output: &Path, options: &ConversionOptions) -> ConversionResult {
        match self.try_convert(input, output, options).await {
            Ok(()) => {
                debug!("Converted {} -> {}", input.display(), output.display());
                ConversionResult::success(input, output)
            }
            Err(e) => {
                warn!("Failed to convert {}: {}", input.display(), e);
                ConversionResult::failure(input, output, &e)
            }
        }
    }

    pub async fn dispatch(&self, job: &ConversionJob) -> ConversionResult {
        self.convert(&job.input_path, &job.output_path, &job.options).await
    }

    async fn try_convert(&self, input: &Path, output: &Path, options: &ConversionOptions) -> Result<(), ConvertError> {
        if !input.is_file() {
            return Err(ConvertError::InputMissing(input.to_path_buf()));
        }

        let category = classify(input);
        if category == FileCategory::Unknown {
            let ext = extension_of(input);
            let shown = if ext.is_empty() { "(none)".to_string() } else { format!(".{}", ext) };
            return Err(ConvertError::UnsupportedFormat(format!("input extension {}", shown)));
        }

        let converter = self
            .registry
            .get(category)
            .ok_or(ConvertError::NoConverterAvailable(category))?;

        let output_format = extension_of(output);
        if !converter.supports_output(&output_format) {
            return Err(ConvertError::UnsupportedFormat(format!(
                "{} files cannot be converted to .{}",
                category, output_format
            )));
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        converter.convert(input, output, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{StubBehavior, StubConverter};
    use tempfile::TempDir;

    fn dispatcher_with(stubs: Vec<StubConverter>) -> Dispatcher {
        let mut registry = ConverterRegistry::new();
        for stub in stubs {
            registry.register(Arc::new(stub));
        }
        Dispatcher::new(Arc::new(registry))
    }

    fn touch(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_input() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher_with(vec![StubConverter::new(FileCategory::Image, &["jpg"])]);

        let result = dispatcher
            .convert(&dir.path().join("nope.png"), &dir.path().join("nope.jpg"), &ConversionOptions::default())
            .await;
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::InputMissing));
    }

    #[tokio::test]
    async fn test_unknown_extension_cites_extension() {
        let dir = TempDir::new().unwrap();
        let input = touch(&dir, "data.xyz");
        let dispatcher = dispatcher_with(vec![]);

        let result = dispatcher.convert(&input, &dir.path().join("data.pdf"), &ConversionOptions::default()).await;
        assert_eq!(result.error, Some(ErrorKind::UnsupportedFormat));
        assert!(result.message.contains(".xyz"));
    }

    #[tokio::test]
    async fn test_archive_has_no_converter() {
        let dir = TempDir::new().unwrap();
        let input = touch(&dir, "bundle.zip");
        let dispatcher = dispatcher_with(vec![StubConverter::new(FileCategory::Image, &["jpg"])]);

        let result = dispatcher.convert(&input, &dir.path().join("bundle.tar"), &ConversionOptions::default()).await;
        assert_eq!(result.error, Some(ErrorKind::NoConverterAvailable));
        assert!(result.message.contains("archive"));
    }

    #[tokio::test]
    async fn test_output_format_not_listed() {
        let dir = TempDir::new().unwrap();
        let input = touch(&dir, "photo.png");
        let stub = Arc::new(StubConverter::new(FileCategory::Image, &["jpg"]));
        let mut registry = ConverterRegistry::new();
        registry.register(stub.clone());
        let dispatcher = Dispatcher::new(Arc::new(registry));

        let result = dispatcher.convert(&input, &dir.path().join("photo.mp3"), &ConversionOptions::default()).await;
        assert_eq!(result.error, Some(ErrorKind::UnsupportedFormat));
        assert_eq!(stub.call_count(), 0);
    }

    #[tokio::test]
    async fn test_success_creates_output_directory() {
        let dir = TempDir::new().unwrap();
        let input = touch(&dir, "photo.png");
        let output = dir.path().join("deep/nested/photo.jpg");
        let dispatcher = dispatcher_with(vec![StubConverter::new(FileCategory::Image, &["jpg"])]);

        let result = dispatcher.convert(&input, &output, &ConversionOptions::default()).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.message, "Successfully converted photo.png to photo.jpg");
        assert!(output.is_file());
    }

    #[tokio::test]
    async fn test_converter_error_becomes_result() {
        let dir = TempDir::new().unwrap();
        let input = touch(&dir, "song.wav");
        let stub = StubConverter::new(FileCategory::Audio, &["mp3"]).with_behavior(StubBehavior::Fail("boom".into()));
        let dispatcher = dispatcher_with(vec![stub]);

        let job = ConversionJob::new(&input, dir.path().join("song.mp3"), Arc::default());
        let result = dispatcher.dispatch(&job).await;
        assert!(!result.success);
        assert_eq!(result.error, Some(ErrorKind::ExternalToolFailed));
        assert!(result.message.contains("boom"));
    }
}
