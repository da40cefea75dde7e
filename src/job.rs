//! # Jobs and Results
//!
//! `ConversionJob` is one unit of work; `ConversionResult` is what every job produces,
//! whether it succeeded or not.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::category::{classify, FileCategory};
use crate::error::{ConvertError, ErrorKind};
use crate::options::ConversionOptions;

/// One input file, its output path and the options to apply
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub category: FileCategory,
    /// Shared by every job of a batch, never mutated after creation
    pub options: Arc<ConversionOptions>,
}

impl ConversionJob {
    pub fn new(
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        options: Arc<ConversionOptions>,
    ) -> Self {
        let input_path = input_path.into();
        let category = classify(&input_path);
        Self {
            input_path,
            output_path: output_path.into(),
            category,
            options,
        }
    }

    /// Human-readable label used in progress reports
    pub fn label(&self) -> String {
        file_label(&self.input_path)
    }
}

pub(crate) fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Outcome of one job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionResult {
    pub success: bool,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub message: String,
    pub error: Option<ErrorKind>,
}

impl ConversionResult {
    pub fn success(input_path: &Path, output_path: &Path) -> Self {
        Self {
            success: true,
            message: format!(
                "Successfully converted {} to {}",
                file_label(input_path),
                file_label(output_path)
            ),
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            error: None,
        }
    }

    pub fn failure(input_path: &Path, output_path: &Path, error: &ConvertError) -> Self {
        Self {
            success: false,
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            message: error.to_string(),
            error: Some(error.kind()),
        }
    }

    /// A job whose execution panicked instead of returning
    pub fn panicked(input_path: &Path, output_path: &Path, reason: &str) -> Self {
        Self {
            success: false,
            input_path: input_path.to_path_buf(),
            output_path: output_path.to_path_buf(),
            message: format!("Processing error: {}", reason),
            error: Some(ErrorKind::JobPanicked),
        }
    }

    /// Label of the input file, as shown in progress reports
    pub fn label(&self) -> String {
        file_label(&self.input_path)
    }
}
