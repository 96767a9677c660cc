//! Input discovery.
//!
//! Expands the configured glob pattern, drops files whose name already carries
//! the completion marker, and returns the rest in lexicographic order so every
//! run processes (and later marks) files in the same sequence.
//!
//! ```no_run
//! use appsload::io::glob::discover;
//!
//! let pending = discover("/data/appsinstalled/*.tsv.gz", ".")?;
//! # use anyhow::Error; Ok::<(), Error>(())
//! ```

use anyhow::{Context, Result, bail};
use glob::glob;
use std::path::{Path, PathBuf};

/// Expand a glob pattern into a sorted vector of matching file paths.
///
/// Directories are skipped. Zero matches is not an error.
///
/// # Errors
///
/// Returns an error if the pattern is empty or invalid, or if a matched entry
/// cannot be read.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    if pattern.trim().is_empty() {
        bail!("empty file pattern");
    }
    let paths = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut result = Vec::new();
    for entry in paths {
        let path =
            entry.with_context(|| format!("error reading glob entry for pattern: {pattern}"))?;
        if path.is_file() {
            result.push(path);
        }
    }

    result.sort();
    Ok(result)
}

/// Whether the file name of `path` starts with `marker`.
#[must_use]
pub fn is_marked(path: &Path, marker: &str) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with(marker))
}

/// Files matching `pattern` that have not been marked as processed, sorted.
///
/// # Errors
///
/// Propagates the errors of [`expand_glob`].
pub fn discover(pattern: &str, marker: &str) -> Result<Vec<PathBuf>> {
    Ok(expand_glob(pattern)?
        .into_iter()
        .filter(|path| !is_marked(path, marker))
        .collect())
}

/// Sibling path of `path` with `marker` prefixed to its file name.
#[must_use]
pub fn marked_path(path: &Path, marker: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{marker}{name}"))
}

/// Rename `path` to its marked form and return the new path.
///
/// # Errors
///
/// Returns an error if the rename fails.
pub fn mark_processed(path: &Path, marker: &str) -> Result<PathBuf> {
    let target = marked_path(path, marker);
    std::fs::rename(path, &target).with_context(|| {
        format!("rename {} -> {}", path.display(), target.display())
    })?;
    Ok(target)
}
