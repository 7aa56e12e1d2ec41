//! Exclusive run lock
//!
//! Advisory file lock using fd-lock. Only one export may write to an
//! output directory at a time; a second run fails fast instead of
//! interleaving writes.

use super::CheckpointError;
use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Lock file wrapper; hold the guard from [`RunLock::try_hold`] for the run
pub struct RunLock {
    lock: RwLock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Open (creating if needed) the lock file at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| CheckpointError::Lock(format!("Failed to open lock file: {e}")))?;

        Ok(Self {
            lock: RwLock::new(file),
            path,
        })
    }

    /// Try to take the exclusive lock without blocking.
    ///
    /// The lock is released when the returned guard is dropped.
    ///
    /// # Errors
    /// `CheckpointError::AlreadyRunning` if another process holds it.
    pub fn try_hold(&mut self) -> Result<RwLockWriteGuard<'_, File>, CheckpointError> {
        let path = self.path.clone();
        self.lock.try_write().map_err(|e| {
            if e.kind() == ErrorKind::WouldBlock {
                CheckpointError::AlreadyRunning(path)
            } else {
                CheckpointError::Lock(format!("Failed to acquire lock: {e}"))
            }
        })
    }

    /// Lock file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}
