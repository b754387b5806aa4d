//! Filesystem helper for tests
// Copyright (c) 2020 Sergio Benitez, (c) 2025 Ross Younger
// MIT license applies to this file.

use std::fs::{self, File};
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use tempfile::TempDir;

/// This is a sort of "lightweight jail".
/// The process changes directory into the litter tray during execution, but is not well constrained.
/// On drop, the litter tray is automatically cleaned up.
///
/// This is a derivative work of `figment::Jail` but simpler (no environment variables).
#[derive(Debug)]
pub(crate) struct LitterTray {
    canonical_dir: PathBuf,
    _dir: TempDir,
    saved_cwd: PathBuf,
}

/// This mutex ensures that only one test can use a litter tray at once.
/// Necessary because it changes the process working directory.
static G_LOCK: Mutex<()> = Mutex::new(());

impl LitterTray {
    /// Runs a closure in a new litter tray, passing the tray to the closure.
    /// The closure must return a Result<()>.
    pub(crate) fn try_with<F: FnOnce(&mut LitterTray) -> Result<()>>(f: F) -> Result<()> {
        let _guard = G_LOCK.lock();
        let dir = TempDir::new()?;
        let mut tray = LitterTray {
            canonical_dir: dir.path().canonicalize()?,
            _dir: dir,
            saved_cwd: std::env::current_dir()?,
        };
        std::env::set_current_dir(tray.directory())?;
        f(&mut tray)
    }

    /// Returns the temporary directory that is this litter tray.
    /// This directory will be removed on drop.
    #[must_use]
    pub(crate) fn directory(&self) -> &Path {
        &self.canonical_dir
    }

    fn safe_path_within_tray(&self, path: &Path) -> Result<PathBuf> {
        if path.is_absolute() && path.starts_with(self.directory()) {
            return Ok(path.to_path_buf());
        }
        anyhow::ensure!(
            path.is_relative(),
            "LitterTray: input path is outside of tray directory"
        );
        Ok(path.to_path_buf())
    }

    /// Creates a binary file within the tray
    pub(crate) fn create_binary<P: AsRef<Path>>(&self, path: P, bytes: &[u8]) -> Result<File> {
        let path = self.safe_path_within_tray(path.as_ref())?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes)?;
        Ok(writer.into_inner()?)
    }

    /// Creates a text file within the tray
    pub(crate) fn create_text<P: AsRef<Path>>(&self, path: P, contents: &str) -> Result<File> {
        self.create_binary(path, contents.as_bytes())
    }

    /// Creates a directory within the tray
    #[allow(dead_code)]
    pub(crate) fn make_dir<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let path = self.safe_path_within_tray(path.as_ref())?;
        fs::create_dir_all(&path)?;
        Ok(path)
    }
}

impl Drop for LitterTray {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.saved_cwd);
    }
}
