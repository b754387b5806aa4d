//! Local-filesystem helpers used by the client
// (c) 2025 Ross Younger

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use tempfile::TempDir;

/// True if `path` names an existing file or directory.
#[must_use]
pub fn exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists()
}

/// Size of a regular file in bytes.
///
/// # Errors
/// Any error stat'ing the file.
pub fn file_size<P: AsRef<Path>>(path: P) -> Result<u64> {
    let meta = std::fs::metadata(path.as_ref())
        .with_context(|| format!("stat {:?}", path.as_ref()))?;
    Ok(meta.len())
}

/// The final component of a path, as the remote filesystem will see it.
/// An empty string if the path has no final component.
#[must_use]
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Canonicalizes a path (resolving symlinks; the path must exist).
///
/// # Errors
/// Any error resolving the path.
pub fn canonical<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    path.as_ref()
        .canonicalize()
        .with_context(|| format!("canonicalize {:?}", path.as_ref()))
}

/// Creates a fresh temporary directory with the given prefix.
/// The directory persists until the returned handle is dropped.
///
/// # Errors
/// Any error creating the directory.
pub fn create_tmp_directory(prefix: &str) -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .context("create temp directory")
}
