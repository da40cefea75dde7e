//! # JSON Output Module
//!
//! One JSON object per line on stdout, for front-ends driving the CLI as a
//! subprocess.
//!
//! ## Message types:
//! - `start`: a batch is about to run
//! - `progress`: a job finished, with the running position
//! - `file_complete`: a single-file conversion finished
//! - `complete`: the batch ended, with its totals
//! - `error`: the command failed before or outside any job

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ErrorKind;
use crate::job::ConversionResult;
use crate::scheduler::{BatchProgress, BatchState};
use crate::summary::BatchSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JsonMessage {
    #[serde(rename = "start")]
    Start {
        input_dir: PathBuf,
        output_dir: PathBuf,
        total_files: usize,
        workers: usize,
    },

    #[serde(rename = "progress")]
    Progress {
        current: usize,
        total: usize,
        percentage: f64,
        file: String,
        success: bool,
        message: String,
    },

    #[serde(rename = "file_complete")]
    FileComplete {
        input: PathBuf,
        output: PathBuf,
        success: bool,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorKind>,
    },

    #[serde(rename = "complete")]
    Complete {
        total: usize,
        successful: usize,
        failed: usize,
        state: String,
        duration_seconds: f64,
    },

    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
}

impl JsonMessage {
    /// Write the message as one line on stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(input_dir: PathBuf, output_dir: PathBuf, total_files: usize, workers: usize) -> Self {
        Self::Start {
            input_dir,
            output_dir,
            total_files,
            workers,
        }
    }

    pub fn progress(progress: &BatchProgress) -> Self {
        let percentage = if progress.total > 0 {
            (progress.completed as f64 / progress.total as f64) * 100.0
        } else {
            0.0
        };

        Self::Progress {
            current: progress.completed,
            total: progress.total,
            percentage,
            file: progress.label.clone(),
            success: progress.success,
            message: progress.message.clone(),
        }
    }

    pub fn file_complete(result: &ConversionResult) -> Self {
        Self::FileComplete {
            input: result.input_path.clone(),
            output: result.output_path.clone(),
            success: result.success,
            message: result.message.clone(),
            error: result.error,
        }
    }

    pub fn complete(summary: &BatchSummary, state: BatchState, duration_seconds: f64) -> Self {
        Self::Complete {
            total: summary.total,
            successful: summary.successful,
            failed: summary.failed,
            state: state.to_string(),
            duration_seconds,
        }
    }

    pub fn error(message: impl Into<String>, details: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_progress_message() {
        let progress = BatchProgress {
            completed: 1,
            total: 4,
            label: "a.png".to_string(),
            success: true,
            message: "Successfully converted a.png to a.jpg".to_string(),
        };

        let value: Value = serde_json::to_value(JsonMessage::progress(&progress)).unwrap();
        assert_eq!(value["type"], "progress");
        assert_eq!(value["percentage"], json!(25.0));
        assert_eq!(value["file"], "a.png");
    }

    #[test]
    fn test_complete_message() {
        let summary = BatchSummary {
            total: 3,
            successful: 2,
            failed: 1,
            results: Vec::new(),
        };

        let value: Value = serde_json::to_value(JsonMessage::complete(&summary, BatchState::Cancelled, 1.5)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "complete",
                "total": 3,
                "successful": 2,
                "failed": 1,
                "state": "cancelled",
                "duration_seconds": 1.5
            })
        );
    }

    #[test]
    fn test_error_message_omits_empty_details() {
        let value: Value = serde_json::to_value(JsonMessage::error("boom", None)).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "boom"}));
    }
}
