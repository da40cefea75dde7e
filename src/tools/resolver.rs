//! # External Tool Resolver
//!
//! Finds the external programs the converters delegate to.
//!
//! ## Lookup order:
//! 1. The configured tools directory (`tools_dir` or `FILEFORGE_TOOLS_DIR`),
//!    either `<dir>/<platform>/<tool>` or `<dir>/<tool>`
//! 2. Every directory of `PATH`
//!
//! A tool may be known under several executable names (`soffice` / `libreoffice`);
//! the first one found wins.
//!
//! Resolution happens once, when the registry is built. The resulting `ResolvedTools`
//! is then shared read-only by every converter.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An external program used by a converter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
    Exiftool,
    Qpdf,
    Soffice,
    Pandoc,
    Ocrmypdf,
    HeifConvert,
    Magick,
}

impl Tool {
    pub const ALL: [Tool; 9] = [
        Tool::Ffmpeg,
        Tool::Ffprobe,
        Tool::Exiftool,
        Tool::Qpdf,
        Tool::Soffice,
        Tool::Pandoc,
        Tool::Ocrmypdf,
        Tool::HeifConvert,
        Tool::Magick,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
            Tool::Exiftool => "exiftool",
            Tool::Qpdf => "qpdf",
            Tool::Soffice => "soffice",
            Tool::Pandoc => "pandoc",
            Tool::Ocrmypdf => "ocrmypdf",
            Tool::HeifConvert => "heif-convert",
            Tool::Magick => "magick",
        }
    }

    /// Executable names tried in order
    fn executables(&self) -> &'static [&'static str] {
        match self {
            Tool::Ffmpeg => &["ffmpeg"],
            Tool::Ffprobe => &["ffprobe"],
            Tool::Exiftool => &["exiftool"],
            Tool::Qpdf => &["qpdf"],
            Tool::Soffice => &["soffice", "libreoffice"],
            Tool::Pandoc => &["pandoc"],
            Tool::Ocrmypdf => &["ocrmypdf"],
            Tool::HeifConvert => &["heif-convert", "heif-dec"],
            Tool::Magick => &["magick"],
        }
    }

    /// What the tool is used for, shown in the tools report
    pub fn purpose(&self) -> &'static str {
        match self {
            Tool::Ffmpeg => "audio/video conversion",
            Tool::Ffprobe => "audio/video information",
            Tool::Exiftool => "image metadata preservation",
            Tool::Qpdf => "PDF merge, encryption, decryption",
            Tool::Soffice => "office documents",
            Tool::Pandoc => "markup documents",
            Tool::Ocrmypdf => "PDF OCR",
            Tool::HeifConvert => "HEIC/HEIF decoding",
            Tool::Magick => "PSD/SVG decoding, HEIC fallback",
        }
    }

    /// Installation hint for the current platform
    pub fn install_hint(&self) -> String {
        if cfg!(target_os = "linux") {
            let package = match self {
                Tool::Ffmpeg | Tool::Ffprobe => "ffmpeg",
                Tool::Exiftool => "libimage-exiftool-perl",
                Tool::Qpdf => "qpdf",
                Tool::Soffice => "libreoffice",
                Tool::Pandoc => "pandoc",
                Tool::Ocrmypdf => "ocrmypdf",
                Tool::HeifConvert => "libheif-examples",
                Tool::Magick => "imagemagick",
            };
            format!("sudo apt-get install {}", package)
        } else if cfg!(target_os = "macos") {
            let formula = match self {
                Tool::Ffmpeg | Tool::Ffprobe => "ffmpeg",
                Tool::Exiftool => "exiftool",
                Tool::Qpdf => "qpdf",
                Tool::Soffice => "--cask libreoffice",
                Tool::Pandoc => "pandoc",
                Tool::Ocrmypdf => "ocrmypdf",
                Tool::HeifConvert => "libheif",
                Tool::Magick => "imagemagick",
            };
            format!("brew install {}", formula)
        } else {
            format!("install {} and add it to PATH", self.name())
        }
    }
}

/// Tool path resolver
#[derive(Debug, Clone, Default)]
pub struct ToolResolver {
    tools_dir: Option<PathBuf>,
}

impl ToolResolver {
    pub fn new(tools_dir: Option<PathBuf>) -> Self {
        Self { tools_dir }
    }

    /// Resolve the path to a specific tool
    pub fn resolve(&self, tool: Tool) -> Option<PathBuf> {
        for executable in tool.executables() {
            if let Some(ref tools_dir) = self.tools_dir {
                if let Some(path) = find_in_tools_dir(tools_dir, executable) {
                    debug!("Using bundled tool: {} -> {:?}", tool.name(), path);
                    return Some(path);
                }
            }

            if let Some(path) = find_in_system_path(executable) {
                debug!("Using system tool: {} -> {:?}", tool.name(), path);
                return Some(path);
            }
        }

        debug!("Tool not found: {}", tool.name());
        None
    }

    /// Resolve every known tool once
    pub fn resolve_all(&self) -> ResolvedTools {
        let paths = Tool::ALL
            .into_iter()
            .filter_map(|tool| self.resolve(tool).map(|path| (tool, path)))
            .collect();
        ResolvedTools { paths }
    }
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

fn platform_dir() -> &'static str {
    if cfg!(target_os = "macos") {
        "darwin"
    } else {
        env::consts::OS
    }
}

fn find_in_tools_dir(tools_dir: &Path, name: &str) -> Option<PathBuf> {
    let file = executable_name(name);
    [
        tools_dir.join(platform_dir()).join(&file),
        tools_dir.join(platform_dir()).join(name).join(&file),
        tools_dir.join(&file),
    ]
    .into_iter()
    .find(|path| path.is_file())
}

/// Find tool in system PATH
fn find_in_system_path(name: &str) -> Option<PathBuf> {
    let file = executable_name(name);
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(&file))
        .find(|path| path.is_file())
}

/// Paths of the external tools found at startup
#[derive(Debug, Clone, Default)]
pub struct ResolvedTools {
    paths: BTreeMap<Tool, PathBuf>,
}

impl ResolvedTools {
    /// No tool at all, every external step reports the tool as unavailable
    pub fn none() -> Self {
        Self::default()
    }

    /// Explicit paths, mostly for tests
    pub fn with(mut self, tool: Tool, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(tool, path.into());
        self
    }

    pub fn get(&self, tool: Tool) -> Option<&Path> {
        self.paths.get(&tool).map(PathBuf::as_path)
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.paths.contains_key(&tool)
    }

    /// Log a warning for each missing tool
    pub fn warn_missing(&self) {
        for tool in Tool::ALL {
            if !self.is_available(tool) {
                warn!(
                    "{} not found, {} disabled (install with: {})",
                    tool.name(),
                    tool.purpose(),
                    tool.install_hint()
                );
            }
        }
    }

    /// Get a report of tool availability
    pub fn report(&self) -> String {
        let mut report = String::from("External tools:\n");
        for tool in Tool::ALL {
            match self.get(tool) {
                Some(path) => {
                    report.push_str(&format!("  ✅ {:<12} {} ({})\n", tool.name(), path.display(), tool.purpose()));
                }
                None => {
                    report.push_str(&format!(
                        "  ❌ {:<12} not found, {} unavailable (install with: {})\n",
                        tool.name(),
                        tool.purpose(),
                        tool.install_hint()
                    ));
                }
            }
        }
        report
    }
}
