//! Entry path sanitisation.
//!
//! Archive entries carry untrusted paths. Sanitisation strips the configured
//! number of leading segments, rejects traversal, and de-roots absolute
//! paths. A path that fails sanitisation skips its entry; it never aborts
//! the archive.

/// The outcome of sanitising one entry path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizedPath {
    /// The entry is admitted under this `/`-joined relative path.
    Clean {
        /// The sanitised path.
        path: String,
        /// Warnings to report for the entry even though it was admitted.
        warnings: Vec<String>,
    },
    /// The entry is skipped with a warning.
    Skip {
        /// The reason reported to the warn sink.
        reason: String,
    },
    /// The entry is skipped without any report (too few segments for the
    /// configured strip count, or nothing left after stripping).
    SkipSilently,
}

/// Sanitises a tar entry path.
///
/// Steps, in order:
/// 1. split on `/` and `\`; entries with fewer than `strip` segments are
///    skipped silently;
/// 2. drop the first `strip` segments and rejoin with `/`;
/// 3. any remaining `..` segment rejects the entry;
/// 4. a path that is absolute under either POSIX or Windows rules has its
///    root stripped with a warning; if it is somehow still absolute it is
///    admitted as-is with a second warning.
pub fn sanitize_entry_path(raw: &str, strip: usize) -> SanitizedPath {
    let segments: Vec<&str> = raw.split(['/', '\\']).collect();
    if segments.len() < strip {
        return SanitizedPath::SkipSilently;
    }

    let remaining = &segments[strip..];
    if remaining.iter().any(|segment| *segment == "..") {
        return SanitizedPath::Skip {
            reason: "path contains '..'".to_string(),
        };
    }

    let path = remaining.join("/");
    if path.split('/').all(str::is_empty) {
        return SanitizedPath::SkipSilently;
    }

    let mut warnings = Vec::new();
    let path = if let Some(stripped) = strip_path_root(&path) {
        warnings.push(format!("stripped root from absolute path '{path}'"));
        if is_absolute(&stripped) {
            // Still absolute after de-rooting once; admitted, but flagged.
            warnings.push(format!("path '{stripped}' is still absolute"));
        }
        stripped
    } else {
        path
    };

    SanitizedPath::Clean { path, warnings }
}

/// Strips one level of filesystem root from a path, returning `None` if the
/// path was not absolute. Handles POSIX roots (`/foo`) as well as Windows
/// drive (`C:/foo`) and UNC (`\\server`, already split to empty segments)
/// forms.
fn strip_path_root(path: &str) -> Option<String> {
    if let Some(rest) = path.strip_prefix('/') {
        return Some(rest.to_string());
    }

    let (first, rest) = path.split_once('/')?;
    if is_drive_root(first) {
        return Some(rest.to_string());
    }

    None
}

/// Returns true if the path is absolute under POSIX or Windows rules.
fn is_absolute(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    match path.split_once('/') {
        Some((first, _)) => is_drive_root(first),
        None => is_drive_root(path),
    }
}

/// Returns true for a Windows drive designator segment such as `C:`.
fn is_drive_root(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(letter), Some(':'), None) if letter.is_ascii_alphabetic()
    )
}
