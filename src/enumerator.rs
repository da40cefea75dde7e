//! # Job Enumerator
//!
//! Walks a source directory and turns every matching regular file into a
//! `ConversionJob` whose output mirrors the file's relative path under the
//! destination directory.
//!
//! ## Matching:
//! - `pattern` is a shell glob matched against the file name, or against the path
//!   relative to the source directory when the pattern contains a `/`
//! - non-recursive walks only look at the top level
//! - directories, symlinks to directories and unreadable entries are skipped
//!
//! ## Output naming:
//! `OutputNaming::KeepExtension` mirrors the path as-is (same-format operations such as
//! a batch resize); `OutputNaming::ChangeExtension` substitutes the target format.
//!
//! Jobs come out in directory traversal order. Nothing matching is not an error.

use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ConvertError;
use crate::job::ConversionJob;
use crate::options::ConversionOptions;

/// How an output file name is derived from its input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputNaming {
    /// Mirror the input name unchanged
    KeepExtension,
    /// Replace the extension with this format
    ChangeExtension(String),
}

impl OutputNaming {
    /// `ChangeExtension` for `Some(format)`, `KeepExtension` otherwise
    pub fn from_format(format: Option<&str>) -> Self {
        match format.map(|f| f.trim().trim_start_matches('.')) {
            Some(f) if !f.is_empty() => OutputNaming::ChangeExtension(f.to_ascii_lowercase()),
            _ => OutputNaming::KeepExtension,
        }
    }

    fn apply(&self, mut path: PathBuf) -> PathBuf {
        if let OutputNaming::ChangeExtension(ext) = self {
            path.set_extension(ext);
        }
        path
    }
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Builds the job list of a batch
#[derive(Debug, Clone)]
pub struct JobEnumerator {
    pattern: Pattern,
    match_relative_path: bool,
    recursive: bool,
    naming: OutputNaming,
}

impl JobEnumerator {
    pub fn new(pattern: &str, recursive: bool, naming: OutputNaming) -> Result<Self, ConvertError> {
        let compiled = Pattern::new(pattern)
            .map_err(|e| ConvertError::invalid_options(format!("invalid pattern '{}': {}", pattern, e)))?;

        Ok(Self {
            pattern: compiled,
            match_relative_path: pattern.contains('/'),
            recursive,
            naming,
        })
    }

    /// One job per matching file under `source_dir`
    pub fn enumerate(
        &self,
        source_dir: &Path,
        dest_dir: &Path,
        options: Arc<ConversionOptions>,
    ) -> Result<Vec<ConversionJob>, ConvertError> {
        if !source_dir.is_dir() {
            return Err(ConvertError::InputMissing(source_dir.to_path_buf()));
        }

        let mut walker = WalkDir::new(source_dir).min_depth(1);
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let mut jobs = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = match entry.path().strip_prefix(source_dir) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            if !self.matches(relative) {
                continue;
            }

            let output = self.naming.apply(dest_dir.join(relative));
            jobs.push(ConversionJob::new(entry.path(), output, Arc::clone(&options)));
        }

        debug!("Enumerated {} jobs under {}", jobs.len(), source_dir.display());
        Ok(jobs)
    }

    fn matches(&self, relative: &Path) -> bool {
        if self.match_relative_path {
            let relative = relative.to_string_lossy().replace('\\', "/");
            return self.pattern.matches_with(&relative, MATCH_OPTIONS);
        }
        relative
            .file_name()
            .map(|name| self.pattern.matches_with(&name.to_string_lossy(), MATCH_OPTIONS))
            .unwrap_or(false)
    }
}
