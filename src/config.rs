//! # Configuration Management Module
//!
//! Runtime configuration of the conversion engine.
//!
//! ## Responsibilities:
//! - Defines `Config` with the batch defaults, tool lookup and per-tool timeouts
//! - Validates every parameter before the engine is built
//! - Loads/saves the configuration as a JSON file
//!
//! ## Parameters:
//! - `workers`: parallel jobs in a batch (default: available CPU cores)
//! - `recursive`: descend into sub-directories when enumerating (default: true)
//! - `pattern`: glob filter applied to file names (default: `*`)
//! - `tools_dir`: extra directory searched for external tools before `PATH`
//! - `timeouts`: wall-clock limit of a single external tool invocation, per kind of tool
//! - `options`: default conversion options
//! - `json_output`: emit JSON-lines events instead of a progress bar
//!
//! ## Example:
//! ```rust
//! use fileforge::Config;
//!
//! let mut config = Config::default();
//! config.workers = 8;
//! config.options.image.quality = 85;
//! assert!(config.validate().is_ok());
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::options::ConversionOptions;

/// Environment variable overriding `tools_dir`
pub const TOOLS_DIR_ENV: &str = "FILEFORGE_TOOLS_DIR";

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of parallel workers
    pub workers: usize,
    /// Enumerate sub-directories in batch mode
    pub recursive: bool,
    /// Glob pattern for batch mode
    pub pattern: String,
    /// Directory searched for external tools before PATH
    pub tools_dir: Option<PathBuf>,
    pub timeouts: ToolTimeouts,
    /// Default conversion options
    pub options: ConversionOptions,
    /// Output progress and status as JSON for programmatic use
    pub json_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            recursive: true,
            pattern: "*".to_string(),
            tools_dir: None,
            timeouts: ToolTimeouts::default(),
            options: ConversionOptions::default(),
            json_output: false,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Timeouts in seconds for one external tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolTimeouts {
    pub audio_secs: u64,
    pub video_secs: u64,
    pub document_secs: u64,
    /// HEIF/PSD/SVG decoding before an image conversion
    pub image_secs: u64,
    /// ffprobe, exiftool
    pub probe_secs: u64,
}

impl Default for ToolTimeouts {
    fn default() -> Self {
        Self {
            audio_secs: 600,
            video_secs: 3600,
            document_secs: 300,
            image_secs: 120,
            probe_secs: 30,
        }
    }
}

impl ToolTimeouts {
    pub fn audio(&self) -> Duration {
        Duration::from_secs(self.audio_secs)
    }

    pub fn video(&self) -> Duration {
        Duration::from_secs(self.video_secs)
    }

    pub fn document(&self) -> Duration {
        Duration::from_secs(self.document_secs)
    }

    pub fn image(&self) -> Duration {
        Duration::from_secs(self.image_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow::anyhow!("Number of workers must be greater than 0"));
        }

        if self.pattern.trim().is_empty() {
            return Err(anyhow::anyhow!("Pattern must not be empty"));
        }

        if let Err(e) = glob::Pattern::new(&self.pattern) {
            return Err(anyhow::anyhow!("Invalid pattern '{}': {}", self.pattern, e));
        }

        let t = &self.timeouts;
        if t.audio_secs == 0 || t.video_secs == 0 || t.document_secs == 0 || t.image_secs == 0 || t.probe_secs == 0 {
            return Err(anyhow::anyhow!("Tool timeouts must be greater than 0"));
        }

        if let Some(ref dir) = self.tools_dir {
            if !dir.is_dir() {
                return Err(anyhow::anyhow!("Tools directory does not exist: {}", dir.display()));
            }
        }

        self.options.validate()?;

        Ok(())
    }

    /// Apply environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os(TOOLS_DIR_ENV) {
            if !dir.is_empty() {
                self.tools_dir = Some(PathBuf::from(dir));
            }
        }
        self
    }

    /// `<config dir>/fileforge/config.json`, where the CLI looks when no `--config` is given
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fileforge").join("config.json"))
    }

    /// Load configuration from file, falling back to defaults when it does not exist
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid configuration file {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::VideoQuality;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.workers = 0;
        assert!(config.validate().is_err());

        config.workers = 2;
        config.options.image.quality = 101;
        assert!(config.validate().is_err());

        config.options.image.quality = 80;
        config.options.video.quality = VideoQuality::Crf(60);
        assert!(config.validate().is_err());

        config.options.video.quality = VideoQuality::Medium;
        config.timeouts.probe_secs = 0;
        assert!(config.validate().is_err());

        config.timeouts.probe_secs = 30;
        config.timeouts.image_secs = 0;
        assert!(config.validate().is_err());

        config.timeouts.image_secs = 120;
        config.pattern = " ".to_string();
        assert!(config.validate().is_err());

        config.pattern = "[".to_string();
        assert!(config.validate().is_err());

        config.pattern = "*.png".to_string();
        config.options.document.opacity = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.workers >= 1);
        assert!(config.recursive);
        assert_eq!(config.pattern, "*");
        assert_eq!(config.timeouts.video_secs, 3600);
        assert_eq!(config.timeouts.audio(), Duration::from_secs(600));
        assert!(!config.json_output);
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let mut original = Config::default();
        original.workers = 3;
        original.recursive = false;
        original.pattern = "*.heic".to_string();
        original.options.image.quality = 85;
        original.timeouts.document_secs = 120;

        original.save_to_file(&config_path).await.unwrap();
        let loaded = Config::from_file(&config_path).await.unwrap();

        assert_eq!(loaded.workers, 3);
        assert!(!loaded.recursive);
        assert_eq!(loaded.pattern, "*.heic");
        assert_eq!(loaded.options.image.quality, 85);
        assert_eq!(loaded.timeouts.document_secs, 120);
    }

    #[test]
    fn test_default_path() {
        if let Some(path) = Config::default_path() {
            assert!(path.ends_with("fileforge/config.json"));
        }
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::from_file(&temp_dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config.pattern, "*");
    }

    #[tokio::test]
    async fn test_unknown_keys_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"workers": 2, "dry_run": true}"#).await.unwrap();
        assert!(Config::from_file(&path).await.is_err());
    }
}
