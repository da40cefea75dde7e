//! # Conversion Engine
//!
//! The entry points callers use: single-file conversion, batch conversion and the
//! list of supported conversions.
//!
//! ## Responsibilities:
//! - Owns the converter registry, built once and shared read-only by every job
//! - `convert_single` / `convert_file`: direct conversion, bypassing the scheduler
//! - `convert_batch`: enumerate, schedule, summarise
//! - `spawn_batch`: the same batch on a background task, with a progress queue and a
//!   cancel handle, for callers that must not block (a GUI event loop)
//! - `documents()`: the named PDF operations
//!
//! ## Example:
//! ```rust,ignore
//! let engine = ConversionEngine::new(Config::default())?;
//! let request = engine.batch_request("photos", "converted").output_format(Some("jpg"));
//! let summary = engine.convert_batch(request).await?;
//! println!("{}", summary.format_summary());
//! ```

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::info;

use crate::category::{classify, extension_of, FileCategory};
use crate::config::Config;
use crate::converter::{ConverterRegistry, DocumentOperations, MediaInfo};
use crate::dispatcher::Dispatcher;
use crate::enumerator::{JobEnumerator, OutputNaming};
use crate::error::ConvertError;
use crate::job::{ConversionJob, ConversionResult};
use crate::options::ConversionOptions;
use crate::scheduler::{BatchControl, BatchProgress, BatchScheduler};
use crate::summary::BatchSummary;
use crate::tools::{ResolvedTools, ToolContext};

/// Parameters of one batch
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub pattern: String,
    pub recursive: bool,
    pub naming: OutputNaming,
    pub options: ConversionOptions,
    /// Falls back to the engine's configured worker count
    pub workers: Option<usize>,
}

impl BatchRequest {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            pattern: "*".to_string(),
            recursive: true,
            naming: OutputNaming::KeepExtension,
            options: ConversionOptions::default(),
            workers: None,
        }
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Convert every file to `format`, or keep the input extension when `None`
    pub fn output_format(mut self, format: Option<&str>) -> Self {
        self.naming = OutputNaming::from_format(format);
        self
    }

    pub fn options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }
}

/// A batch running in the background
pub struct BatchHandle {
    total: usize,
    progress: mpsc::UnboundedReceiver<BatchProgress>,
    control: BatchControl,
    task: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Number of jobs submitted
    pub fn total(&self) -> usize {
        self.total
    }

    /// One message per collected result; closes when the batch ends
    pub fn progress(&mut self) -> &mut mpsc::UnboundedReceiver<BatchProgress> {
        &mut self.progress
    }

    pub fn control(&self) -> BatchControl {
        self.control.clone()
    }

    pub async fn join(self) -> Result<BatchSummary, JoinError> {
        self.task.await
    }
}

/// File conversion engine
pub struct ConversionEngine {
    config: Config,
    tools: ToolContext,
    registry: Arc<ConverterRegistry>,
    dispatcher: Arc<Dispatcher>,
    documents: DocumentOperations,
}

impl ConversionEngine {
    /// Validate `config`, resolve the external tools and build every converter
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let tools = ToolContext::from_config(&config);
        tools.tools.warn_missing();
        Ok(Self::with_context(config, tools))
    }

    /// Build the standard converters on an existing tool context
    pub fn with_context(config: Config, tools: ToolContext) -> Self {
        let registry = Arc::new(ConverterRegistry::from_context(&tools));
        Self::from_parts(config, tools, registry)
    }

    /// Use an explicitly constructed registry
    pub fn from_parts(config: Config, tools: ToolContext, registry: Arc<ConverterRegistry>) -> Self {
        info!("Conversion engine ready: {:?}", registry);
        Self {
            dispatcher: Arc::new(Dispatcher::new(Arc::clone(&registry))),
            documents: DocumentOperations::new(tools.clone()),
            config,
            tools,
            registry,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConverterRegistry> {
        &self.registry
    }

    /// External tools found at startup
    pub fn tools(&self) -> &ResolvedTools {
        &self.tools.tools
    }

    pub fn documents(&self) -> &DocumentOperations {
        &self.documents
    }

    /// Convert one file; `false` on any failure
    pub async fn convert_single(&self, input: &Path, output: &Path, options: &ConversionOptions) -> bool {
        self.convert_file(input, output, options).await.success
    }

    /// Convert one file and report the full result
    pub async fn convert_file(&self, input: &Path, output: &Path, options: &ConversionOptions) -> ConversionResult {
        self.dispatcher.convert(input, output, options).await
    }

    /// Describe a file through the handle of its category
    pub async fn info(&self, path: &Path) -> Result<MediaInfo, ConvertError> {
        let category = classify(path);
        if category == FileCategory::Unknown {
            return Err(ConvertError::UnsupportedFormat(format!("input extension .{}", extension_of(path))));
        }
        let converter = self
            .registry
            .get(category)
            .ok_or(ConvertError::NoConverterAvailable(category))?;
        converter.info(path).await
    }

    /// A request filled with the configured batch defaults
    pub fn batch_request(&self, input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> BatchRequest {
        BatchRequest::new(input_dir, output_dir)
            .pattern(self.config.pattern.clone())
            .recursive(self.config.recursive)
            .options(self.config.options.clone())
            .workers(self.config.workers)
    }

    /// The jobs `request` would run
    pub fn plan_batch(&self, request: &BatchRequest) -> Result<Vec<ConversionJob>, ConvertError> {
        request.options.validate()?;
        let enumerator = JobEnumerator::new(&request.pattern, request.recursive, request.naming.clone())?;
        enumerator.enumerate(&request.input_dir, &request.output_dir, Arc::new(request.options.clone()))
    }

    /// Run `jobs` with up to `workers` at once
    pub async fn run_jobs<F>(&self, jobs: Vec<ConversionJob>, workers: usize, on_progress: F) -> BatchSummary
    where
        F: FnMut(&BatchProgress) + Send,
    {
        BatchScheduler::new(Arc::clone(&self.dispatcher), workers)
            .run_with_progress(jobs, on_progress)
            .await
    }

    pub async fn convert_batch(&self, request: BatchRequest) -> Result<BatchSummary, ConvertError> {
        self.convert_batch_with_progress(request, |_| {}).await
    }

    pub async fn convert_batch_with_progress<F>(
        &self,
        request: BatchRequest,
        on_progress: F,
    ) -> Result<BatchSummary, ConvertError>
    where
        F: FnMut(&BatchProgress) + Send,
    {
        let jobs = self.plan_batch(&request)?;
        let workers = request.workers.unwrap_or(self.config.workers);
        Ok(self.run_jobs(jobs, workers, on_progress).await)
    }

    /// Start a batch on the runtime and return at once
    pub fn spawn_batch(&self, request: BatchRequest) -> Result<BatchHandle, ConvertError> {
        let jobs = self.plan_batch(&request)?;
        Ok(self.spawn_jobs(jobs, request.workers.unwrap_or(self.config.workers)))
    }

    /// Start already planned jobs on the runtime
    pub fn spawn_jobs(&self, jobs: Vec<ConversionJob>, workers: usize) -> BatchHandle {
        let total = jobs.len();
        let scheduler = BatchScheduler::new(Arc::clone(&self.dispatcher), workers);
        let control = scheduler.control();
        let (tx, progress) = mpsc::unbounded_channel();

        let task = tokio::spawn(scheduler.run_with_progress(jobs, move |p: &BatchProgress| {
            // The receiver may have been dropped by a caller that only joins
            let _ = tx.send(p.clone());
        }));

        BatchHandle {
            total,
            progress,
            control,
            task,
        }
    }

    /// Category → output formats, omitting categories without a handle
    pub fn get_supported_conversions(&self) -> BTreeMap<FileCategory, Vec<String>> {
        self.registry.supported_conversions()
    }
}
