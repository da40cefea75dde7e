//! # FileForge Library
//!
//! Batch file conversion for images, documents, audio and video.
//!
//! ## Module architecture:
//! - `category`: maps an extension to a file category
//! - `converter`: the `Converter` contract, the registry and one handle per category
//! - `tools`: external tool lookup and the process runner
//! - `dispatcher`: converts one file through the registry
//! - `enumerator`: turns a directory tree into conversion jobs
//! - `scheduler`: runs jobs on a bounded worker pool, with cancellation
//! - `summary`: totals of a batch
//! - `engine`: the public entry points tying everything together
//! - `config` / `options`: runtime configuration and typed conversion options
//! - `progress` / `json_output`: terminal and machine-readable progress
//! - `testing`: test doubles, only with the `testing` feature
//!
//! ## Usage:
//! ```rust,ignore
//! use fileforge::{Config, ConversionEngine, ConversionOptions};
//!
//! let engine = ConversionEngine::new(Config::default())?;
//! let ok = engine
//!     .convert_single("photo.png".as_ref(), "photo.jpg".as_ref(), &ConversionOptions::default())
//!     .await;
//! ```

pub mod utils;

pub mod category;
pub mod config;
pub mod converter;
pub mod dispatcher;
pub mod engine;
pub mod enumerator;
pub mod error;
pub mod job;
pub mod json_output;
pub mod options;
pub mod progress;
pub mod scheduler;
pub mod summary;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tools;

pub use category::{classify, FileCategory};
pub use config::Config;
pub use converter::{Converter, ConverterRegistry, MediaInfo};
pub use engine::{BatchHandle, BatchRequest, ConversionEngine};
pub use enumerator::OutputNaming;
pub use error::{ConvertError, ErrorKind};
pub use job::{ConversionJob, ConversionResult};
pub use options::ConversionOptions;
pub use scheduler::{BatchControl, BatchProgress, BatchState};
pub use summary::BatchSummary;
