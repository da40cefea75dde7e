//! Test doubles for the converter and tool layers.
//!
//! - `RecordingRunner` stands in for `ProcessRunner` and records every invocation
//! - `StubConverter` is a controllable `Converter` for dispatcher/scheduler tests
//!
//! # Example
//!
//! ```rust,ignore
//! let runner = Arc::new(RecordingRunner::new());
//! let ctx = ToolContext::new(ResolvedTools::none(), runner.clone(), ToolTimeouts::default());
//! let audio = AudioConverter::new(ctx)?;
//! assert!(audio.convert(&input, &output, &options).await.is_err());
//! assert_eq!(runner.call_count(), 0);
//! ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::category::FileCategory;
use crate::converter::Converter;
use crate::error::ConvertError;
use crate::options::ConversionOptions;
use crate::tools::{ToolOutput, ToolRunner};

/// A recorded tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// `ToolRunner` that never spawns anything
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<RecordedCall>>,
    stdout: Vec<u8>,
    failure: Option<String>,
    output: Option<Vec<u8>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call returns `stdout`
    pub fn with_stdout(mut self, stdout: impl Into<Vec<u8>>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Every call exits with a non-zero status and `stderr`
    pub fn failing(mut self, stderr: impl Into<String>) -> Self {
        self.failure = Some(stderr.into());
        self
    }

    /// Create the file named by the last argument, like a tool writing its output
    pub fn writing_output(self) -> Self {
        self.writing_file(b"stub output".to_vec())
    }

    /// Like `writing_output`, with the given content (a real PNG for decoder tools)
    pub fn writing_file(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.output = Some(content.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ToolRunner for RecordingRunner {
    async fn run(&self, program: &Path, args: &[String], _timeout: Duration) -> Result<ToolOutput, ConvertError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                program: program.to_path_buf(),
                args: args.to_vec(),
            });
        }

        if let Some(ref stderr) = self.failure {
            return Ok(ToolOutput {
                success: false,
                exit_code: Some(1),
                stdout: Vec::new(),
                stderr: stderr.clone(),
            });
        }

        if let (Some(content), Some(last)) = (&self.output, args.last()) {
            tokio::fs::write(last, content).await?;
        }

        Ok(ToolOutput {
            success: true,
            exit_code: Some(0),
            stdout: self.stdout.clone(),
            stderr: String::new(),
        })
    }
}

/// What a `StubConverter` does when called
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Copy the input to the output
    Succeed,
    /// Return an `ExternalToolFailed` with this message
    Fail(String),
    /// Panic with this message
    Panic(String),
}

/// Controllable converter handle
#[derive(Debug)]
pub struct StubConverter {
    category: FileCategory,
    formats: Vec<&'static str>,
    behavior: StubBehavior,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StubConverter {
    pub fn new(category: FileCategory, formats: &[&'static str]) -> Self {
        Self {
            category,
            formats: formats.to_vec(),
            behavior: StubBehavior::Succeed,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_behavior(mut self, behavior: StubBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Each conversion sleeps for `delay` first
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of conversions observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Converter for StubConverter {
    fn name(&self) -> &str {
        "stub"
    }

    fn category(&self) -> FileCategory {
        self.category
    }

    fn supported_formats(&self) -> &[&'static str] {
        &self.formats
    }

    async fn convert(&self, input: &Path, output: &Path, _options: &ConversionOptions) -> Result<(), ConvertError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.behavior {
            StubBehavior::Succeed => {
                tokio::fs::copy(input, output).await?;
                Ok(())
            }
            StubBehavior::Fail(message) => Err(ConvertError::tool_failed("stub", message)),
            StubBehavior::Panic(message) => panic!("{}", message),
        }
    }
}
