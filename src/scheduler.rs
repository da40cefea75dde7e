//! # Batch Scheduler
//!
//! Runs a list of jobs on a bounded pool of workers and collects their results.
//!
//! ## Responsibilities:
//! - At most `workers` jobs run at once (one semaphore permit each)
//! - Results flow through a channel to a single collector loop, which appends them
//!   and calls the progress callback; the callback never runs concurrently with itself
//! - A job that panics becomes a failed result instead of aborting the batch
//! - Cooperative cancellation through `BatchControl`
//!
//! ## States:
//! `Idle → Running → Completed | Cancelled`. There is no failed state: job failures
//! are data in the summary.
//!
//! ## Cancellation:
//! Queued jobs never start once the token is cancelled, and the collector stops
//! collecting. Jobs already running finish, but their results are not part of the
//! summary. `run` returns after they have finished.
//!
//! ## Example:
//! ```rust,ignore
//! let scheduler = BatchScheduler::new(dispatcher, 4);
//! let control = scheduler.control();
//! let summary = scheduler
//!     .run_with_progress(jobs, |p| println!("{}/{} {}", p.completed, p.total, p.label))
//!     .await;
//! ```

use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatcher::Dispatcher;
use crate::job::{ConversionJob, ConversionResult};
use crate::summary::{summarize, BatchSummary};

/// Lifecycle of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl BatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BatchState::Running,
            2 => BatchState::Completed,
            3 => BatchState::Cancelled,
            _ => BatchState::Idle,
        }
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BatchState::Idle => "idle",
            BatchState::Running => "running",
            BatchState::Completed => "completed",
            BatchState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Cancel a batch and observe its state from any thread
#[derive(Debug, Clone)]
pub struct BatchControl {
    token: CancellationToken,
    state: Arc<AtomicU8>,
}

impl Default for BatchControl {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchControl {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            state: Arc::new(AtomicU8::new(BatchState::Idle as u8)),
        }
    }

    /// Stop starting and collecting jobs
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn state(&self) -> BatchState {
        BatchState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: BatchState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Reported after every collected result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    /// File name of the job that just finished
    pub label: String,
    pub success: bool,
    pub message: String,
}

pub struct BatchScheduler {
    dispatcher: Arc<Dispatcher>,
    workers: usize,
    control: BatchControl,
}

impl BatchScheduler {
    /// `workers` of 0 is treated as 1
    pub fn new(dispatcher: Arc<Dispatcher>, workers: usize) -> Self {
        Self {
            dispatcher,
            workers: workers.max(1),
            control: BatchControl::new(),
        }
    }

    /// Use an existing control, e.g. one handed out before the batch was built
    pub fn with_control(mut self, control: BatchControl) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> BatchControl {
        self.control.clone()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub async fn run(self, jobs: Vec<ConversionJob>) -> BatchSummary {
        self.run_with_progress(jobs, |_| {}).await
    }

    pub async fn run_with_progress<F>(self, jobs: Vec<ConversionJob>, mut on_progress: F) -> BatchSummary
    where
        F: FnMut(&BatchProgress) + Send,
    {
        let total = jobs.len();
        let control = self.control;
        let token = control.token.clone();

        if token.is_cancelled() {
            info!("Batch cancelled before start");
            control.set_state(BatchState::Cancelled);
            return summarize(Vec::new());
        }

        control.set_state(BatchState::Running);
        info!("Starting batch: {} jobs, {} workers", total, self.workers);

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::unbounded_channel::<ConversionResult>();
        let mut handles = Vec::with_capacity(total);

        for job in jobs {
            let tx = tx.clone();
            let semaphore = Arc::clone(&semaphore);
            let token = token.clone();
            let dispatcher = Arc::clone(&self.dispatcher);

            handles.push(tokio::spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                };

                let result = match AssertUnwindSafe(dispatcher.dispatch(&job)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        error!("Job for {} panicked: {}", job.input_path.display(), reason);
                        ConversionResult::panicked(&job.input_path, &job.output_path, &reason)
                    }
                };

                // The collector may have stopped after a cancel
                let _ = tx.send(result);
            }));
        }
        drop(tx);

        let mut results = Vec::with_capacity(total);
        loop {
            if token.is_cancelled() {
                break;
            }

            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = rx.recv() => result,
            };
            let Some(result) = next else {
                break;
            };

            let progress = BatchProgress {
                completed: results.len() + 1,
                total,
                label: result.label(),
                success: result.success,
                message: result.message.clone(),
            };
            results.push(result);
            on_progress(&progress);
        }

        let state = if results.len() == total {
            BatchState::Completed
        } else {
            info!("Batch cancelled after {} of {} jobs", results.len(), total);
            BatchState::Cancelled
        };

        // Queued jobs return at once; running ones are allowed to finish
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Batch worker failed: {}", e);
            }
        }

        control.set_state(state);
        let summary = summarize(results);
        info!("{}", summary.format_summary());
        summary
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
