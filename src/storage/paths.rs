//! Save-path resolution
//!
//! The configured save path is resolved to absolute form exactly once,
//! at construction, and never changes afterwards.

use std::env;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Lexically resolve `.` and `..` components without touching the
/// filesystem
///
/// Unlike `fs::canonicalize`, this works for paths that do not exist yet,
/// which is the normal case before the first piece is written.
pub(crate) fn clean_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(part) => {
                result.push(part);
            }
            // keep the root and any drive prefix
            other => {
                result.push(other.as_os_str());
            }
        }
    }

    result
}

/// Resolve the configured save path to absolute form
///
/// Relative paths are anchored at the current working directory.
pub(crate) fn absolute_save_path(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(clean_path(path))
    } else {
        Ok(clean_path(&env::current_dir()?.join(path)))
    }
}
