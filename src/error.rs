//! # Error Types Module
//!
//! Defines the error taxonomy shared by converters, the dispatcher and the scheduler.
//!
//! ## Responsibilities:
//! - `ConvertError` enumerates every way a single conversion can fail
//! - `ErrorKind` is the copyable, serialisable tag stored inside a `ConversionResult`
//! - Integrates with `thiserror` for automatic conversion from `io`, `image` and `lopdf` errors
//!
//! ## Propagation policy:
//! Converter handles return `Result<(), ConvertError>`. The dispatcher is the only
//! place where an `Err` is turned into data (a failed `ConversionResult`); nothing
//! above it ever sees a raw error from a converter.
//!
//! ## Example:
//! ```rust,ignore
//! if self.ffmpeg.is_none() {
//!     return Err(ConvertError::ExternalToolUnavailable("ffmpeg".to_string()));
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::category::FileCategory;

/// Errors produced while converting one file
#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("Input file does not exist: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("No converter available for {0} files")]
    NoConverterAvailable(FileCategory),

    #[error("External tool unavailable: {0}")]
    ExternalToolUnavailable(String),

    #[error("External tool failed: {tool}: {message}")]
    ExternalToolFailed { tool: String, message: String },

    #[error("{tool} timed out after {timeout_secs} seconds")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("Output validation failed: {0}")]
    OutputValidationFailed(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
}

impl ConvertError {
    /// Creates an external tool failure, trimming noisy stderr output
    pub fn tool_failed(tool: impl Into<String>, message: impl AsRef<str>) -> Self {
        let message = message.as_ref().trim();
        let message = if message.is_empty() {
            "no diagnostic output".to_string()
        } else {
            message.lines().rev().take(5).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>().join("\n")
        };

        Self::ExternalToolFailed {
            tool: tool.into(),
            message,
        }
    }

    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::InvalidOptions(reason.into())
    }

    /// The taxonomy tag reported in a `ConversionResult`
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputMissing(_) => ErrorKind::InputMissing,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::NoConverterAvailable(_) => ErrorKind::NoConverterAvailable,
            Self::ExternalToolUnavailable(_) => ErrorKind::ExternalToolUnavailable,
            Self::ExternalToolFailed { .. } | Self::Timeout { .. } => ErrorKind::ExternalToolFailed,
            Self::OutputValidationFailed(_) => ErrorKind::OutputValidationFailed,
            Self::InvalidOptions(_) => ErrorKind::InvalidOptions,
            // Library errors from the in-process engines count as engine failures
            Self::Io(_) | Self::Image(_) | Self::Pdf(_) => ErrorKind::ExternalToolFailed,
        }
    }
}

/// Error category carried as data by a failed `ConversionResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputMissing,
    UnsupportedFormat,
    NoConverterAvailable,
    ExternalToolUnavailable,
    ExternalToolFailed,
    OutputValidationFailed,
    InvalidOptions,
    /// A job whose execution panicked; caught by the scheduler
    JobPanicked,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InputMissing => "input missing",
            Self::UnsupportedFormat => "unsupported format",
            Self::NoConverterAvailable => "no converter available",
            Self::ExternalToolUnavailable => "external tool unavailable",
            Self::ExternalToolFailed => "external tool failed",
            Self::OutputValidationFailed => "output validation failed",
            Self::InvalidOptions => "invalid options",
            Self::JobPanicked => "job panicked",
        };
        f.write_str(name)
    }
}
