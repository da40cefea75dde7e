//! # File Category Module
//!
//! Maps a file extension to the category of converter that handles it.
//!
//! ## Responsibilities:
//! - Defines `FileCategory` (image, document, audio, video, archive, unknown)
//! - `classify()` derives the category from the lowercased extension only
//! - The extension tables are compiled-in constants, never configured at runtime
//!
//! ## Example:
//! ```rust
//! use fileforge::category::{classify, FileCategory};
//!
//! assert_eq!(classify("holiday/IMG_0001.HEIC"), FileCategory::Image);
//! assert_eq!(classify("notes"), FileCategory::Unknown);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "heic", "heif", "jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp", "gif", "ico", "psd",
    "raw", "cr2", "nef", "arw", "dng", "orf", "rw2", "pef", "srw", "svg",
];

pub const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "odt", "ods", "odp",
    "csv", "json", "xml", "yaml", "yml", "md", "html", "htm",
];

pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "flac", "aac", "ogg", "wma", "m4a", "opus", "amr", "aiff", "au", "ra",
];

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "3gp", "ogv", "ts", "mts", "m2ts",
];

// Compound names such as `.tar.gz` classify through their last component
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"];

/// Category of a file, derived from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Document,
    Audio,
    Video,
    Archive,
    Unknown,
}

impl FileCategory {
    /// Every category with an extension table, in display order
    pub const KNOWN: [FileCategory; 5] = [
        FileCategory::Image,
        FileCategory::Document,
        FileCategory::Audio,
        FileCategory::Video,
        FileCategory::Archive,
    ];

    /// Category for a bare extension (without the leading dot), case-insensitive
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();

        Self::KNOWN
            .into_iter()
            .find(|category| category.extensions().contains(&ext.as_str()))
            .unwrap_or(FileCategory::Unknown)
    }

    /// The extension table of this category
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            FileCategory::Image => IMAGE_EXTENSIONS,
            FileCategory::Document => DOCUMENT_EXTENSIONS,
            FileCategory::Audio => AUDIO_EXTENSIONS,
            FileCategory::Video => VIDEO_EXTENSIONS,
            FileCategory::Archive => ARCHIVE_EXTENSIONS,
            FileCategory::Unknown => &[],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileCategory::Image => "image",
            FileCategory::Document => "document",
            FileCategory::Audio => "audio",
            FileCategory::Video => "video",
            FileCategory::Archive => "archive",
            FileCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a path by its extension. No filesystem access is performed.
pub fn classify(path: impl AsRef<Path>) -> FileCategory {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .map(FileCategory::from_extension)
        .unwrap_or(FileCategory::Unknown)
}

/// Lowercased extension of a path, empty when there is none
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_table_entry_classifies_to_its_category() {
        for category in FileCategory::KNOWN {
            for ext in category.extensions() {
                let name = format!("x.{}", ext);
                assert_eq!(classify(&name), category, "extension {}", ext);
            }
        }
    }

    #[test]
    fn test_tables_do_not_overlap() {
        for (i, a) in FileCategory::KNOWN.iter().enumerate() {
            for b in FileCategory::KNOWN.iter().skip(i + 1) {
                for ext in a.extensions() {
                    assert!(!b.extensions().contains(ext), "{} in both {} and {}", ext, a, b);
                }
            }
        }
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("X.JPG"), classify("x.jpg"));
        assert_eq!(classify("Movie.MKV"), FileCategory::Video);
        assert_eq!(FileCategory::from_extension(".PDF"), FileCategory::Document);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(classify("x.exe"), FileCategory::Unknown);
        assert_eq!(classify("Makefile"), FileCategory::Unknown);
        assert_eq!(classify(""), FileCategory::Unknown);
        assert_eq!(classify(".hidden"), FileCategory::Unknown);
    }

    #[test]
    fn test_compound_archive_names() {
        assert_eq!(classify("backup.tar.gz"), FileCategory::Archive);
        assert_eq!(classify("backup.tar.xz"), FileCategory::Archive);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let p = "photos/2023/IMG_1234.HeIc";
        assert_eq!(classify(p), classify(p));
        assert_eq!(classify(p), FileCategory::Image);
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("a/B.PNG")), "png");
        assert_eq!(extension_of(Path::new("README")), "");
    }
}
