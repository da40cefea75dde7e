//! # Batch Summary
//!
//! Reduces the results of a batch into totals.
//!
//! `successful + failed == total == results.len()` always holds; `total` counts the
//! results that were collected, so a cancelled batch reports fewer than it submitted.

use serde::Serialize;

use crate::job::ConversionResult;

/// Totals and per-job results of one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// In completion order
    pub results: Vec<ConversionResult>,
}

impl BatchSummary {
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} files | Successful: {} | Failed: {}",
            self.total, self.successful, self.failed
        )
    }
}

/// Count successes and failures
pub fn summarize(results: Vec<ConversionResult>) -> BatchSummary {
    let successful = results.iter().filter(|r| r.success).count();
    BatchSummary {
        total: results.len(),
        successful,
        failed: results.len() - successful,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConvertError;
    use std::path::Path;

    #[test]
    fn test_summarize_mixed() {
        let ok = ConversionResult::success(Path::new("a.png"), Path::new("a.jpg"));
        let bad = ConversionResult::failure(
            Path::new("b.png"),
            Path::new("b.jpg"),
            &ConvertError::UnsupportedFormat("x".into()),
        );

        let summary = summarize(vec![ok.clone(), bad.clone(), ok]);
        assert_eq!((summary.total, summary.successful, summary.failed), (3, 2, 1));
        assert!(!summary.all_succeeded());
        assert_eq!(summary.failures().collect::<Vec<_>>(), vec![&bad]);
        assert_eq!(summary.format_summary(), "Processed: 3 files | Successful: 2 | Failed: 1");
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(Vec::new());
        assert!(summary.is_empty());
        assert!(summary.all_succeeded());
        assert_eq!(summary, BatchSummary::default());
    }
}
