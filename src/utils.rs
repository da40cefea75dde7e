//! # Utility Functions Module
//!
//! Small helpers shared by the converters and the CLI.

use std::path::Path;

/// Converts an iterable of string-like items to `Vec<String>`.
///
/// Used to build external tool argument lists without a `.to_string()` on every item.
///
/// # Example
/// ```rust
/// use fileforge::utils::to_string_vec;
///
/// let args = to_string_vec(["-y", "-i", "input.wav"]);
/// assert_eq!(args.len(), 3);
/// ```
pub fn to_string_vec<T, I>(items: I) -> Vec<String>
where
    T: ToString,
    I: IntoIterator<Item = T>,
{
    items.into_iter().map(|item| item.to_string()).collect()
}

/// Builds an argument vector from items of mixed types.
///
/// # Example
/// ```rust
/// use fileforge::args;
///
/// let crf = 23;
/// let args = args!["-crf", crf, "-preset", "medium"];
/// assert_eq!(args, vec!["-crf", "23", "-preset", "medium"]);
/// ```
#[macro_export]
macro_rules! args {
    [$($item:expr),* $(,)?] => {
        vec![$($item.to_string()),*]
    };
}

/// Path as an owned argument string
pub fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Get human-readable file size
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Human-readable duration, `1h 02m 03s` style
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
