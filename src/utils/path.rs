//! Path normalization utilities.
//!
//! Watch requests and OS events must agree on one spelling of every path:
//! - `normalize_path` - existing paths (canonicalize + fallback)
//! - `normalize_file_path` - files that may not exist yet (or anymore)
//! - `resolve_path` - relative paths against a base directory

use std::path::{Path, PathBuf};

/// Normalize a file system path to absolute form.
///
/// Tries `canonicalize()` first (resolves symlinks, `.`, `..`).
/// Falls back to:
/// - Return as-is if already absolute
/// - Join with current directory if relative
#[inline]
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

/// Normalize the directory part of a file path, keep the file name.
///
/// The file itself is never resolved, so a deleted or not yet created
/// file normalizes the same way as it would while it exists.
pub fn normalize_file_path(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            normalize_path(parent).join(name)
        }
        (Some(_), Some(name)) => normalize_path(Path::new(".")).join(name),
        _ => normalize_path(path),
    }
}

/// Resolve `path` against `base_dir` unless it is already absolute.
#[inline]
pub fn resolve_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize_path(path);
    }
    normalize_path(&base_dir.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_relative() {
        let normalized = normalize_path(Path::new("relative/path/file.txt"));
        assert!(normalized.is_absolute());
    }

    #[test]
    fn test_normalize_file_path_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let missing = temp.path().join("gone.cs");

        let normalized = normalize_file_path(&missing);
        assert_eq!(normalized.parent(), Some(normalize_path(temp.path()).as_path()));
        assert_eq!(normalized.file_name().unwrap(), "gone.cs");
    }

    #[test]
    fn test_normalize_file_path_bare_name() {
        let normalized = normalize_file_path(Path::new("a.cs"));
        assert!(normalized.is_absolute());
        assert!(normalized.ends_with("a.cs"));
    }

    #[test]
    fn test_resolve_path() {
        assert_eq!(
            resolve_path(Path::new("/absolute/path"), Path::new("/base")),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            resolve_path(Path::new("nonexistent/app.csproj"), Path::new("/base")),
            PathBuf::from("/base/nonexistent/app.csproj")
        );
    }
}
