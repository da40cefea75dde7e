//! # Progress Display Module
//!
//! Terminal progress bar for batch conversions, fed by the scheduler's progress
//! messages.
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:00:12] [========================>---------------] 12/20 (60%) ✅ photo.png
//! ```
//!
//! ## Example:
//! ```rust,ignore
//! let progress = ProgressManager::new(jobs.len() as u64);
//! let summary = engine.run_jobs(jobs, workers, |p| progress.update(p)).await;
//! progress.finish(&summary.format_summary());
//! ```

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::scheduler::BatchProgress;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg}";

/// Progress bar for one batch
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// A bar that draws nothing, for JSON mode
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Advance to the position reported by the scheduler
    pub fn update(&self, progress: &BatchProgress) {
        self.bar.set_position(progress.completed as u64);
        self.bar.set_message(status_line(progress));
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    /// Print a line above the bar without breaking it
    pub fn println(&self, message: &str) {
        self.bar.println(message);
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Spinner for work of unknown length
    pub fn spinner(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template(SPINNER_TEMPLATE).unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}

fn status_line(progress: &BatchProgress) -> String {
    if progress.success {
        format!("✅ {}", progress.label)
    } else {
        format!("❌ {}: {}", progress.label, progress.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(completed: usize, success: bool) -> BatchProgress {
        BatchProgress {
            completed,
            total: 4,
            label: "photo.png".to_string(),
            success,
            message: "Input file not found".to_string(),
        }
    }

    #[test]
    fn test_update_follows_scheduler() {
        let manager = ProgressManager::hidden();
        manager.update(&progress(1, true));
        manager.update(&progress(3, false));
        assert_eq!(manager.position(), 3);
    }

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(&progress(1, true)), "✅ photo.png");
        assert_eq!(status_line(&progress(1, false)), "❌ photo.png: Input file not found");
    }
}
