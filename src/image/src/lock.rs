//! Cross-process store lock.
//!
//! Writers take an exclusive advisory `flock` on `<store>/store.lock` so
//! concurrent `skiff` processes never interleave index updates.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use rustix::fs::{flock, FlockOperation};
use skiff_core::error::{Result, SkiffError};

const LOCK_FILE: &str = "store.lock";

/// Handle on the store's lock file.
#[derive(Debug, Clone)]
pub struct StoreLock {
    path: PathBuf,
}

/// Held exclusive lock; released on drop.
#[derive(Debug)]
pub struct StoreLockGuard {
    file: File,
}

impl StoreLock {
    pub fn new(store_dir: &Path) -> Self {
        Self {
            path: store_dir.join(LOCK_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the exclusive lock is held.
    pub fn exclusive(&self) -> Result<StoreLockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(|e| {
                SkiffError::Store(format!(
                    "Failed to open lock file {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
        flock(&file, FlockOperation::LockExclusive).map_err(|e| {
            SkiffError::Store(format!("Failed to lock {}: {}", self.path.display(), e))
        })?;
        Ok(StoreLockGuard { file })
    }

    /// Take the lock without blocking; `None` when another holder has it.
    pub fn try_exclusive(&self) -> Result<Option<StoreLockGuard>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)?;
        match flock(&file, FlockOperation::NonBlockingLockExclusive) {
            Ok(()) => Ok(Some(StoreLockGuard { file })),
            Err(e) if e == rustix::io::Errno::WOULDBLOCK => Ok(None),
            Err(e) => Err(SkiffError::Store(format!(
                "Failed to lock {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        if let Err(e) = flock(&self.file, FlockOperation::Unlock) {
            tracing::warn!(error = %e, "Failed to release store lock");
        }
    }
}
