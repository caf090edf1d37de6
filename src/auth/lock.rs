//! Cross-process lock guarding the interactive device authorization.
//!
//! The marker file is created with `create_new`, so acquiring it is a single
//! atomic filesystem operation. Waiters poll for its disappearance at a fixed
//! interval. There is no TTL: a marker orphaned by a crash must be removed by
//! hand.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// File name of the lock marker.
pub const LOCK_FILE: &str = ".access_token.lock";

/// Default interval between acquisition attempts.
pub const DEFAULT_LOCK_POLL: Duration = Duration::from_secs(1);

/// File-backed mutual exclusion shared by all processes using the same
/// state directory.
#[derive(Debug, Clone)]
pub struct ProcessLock {
    path: PathBuf,
    poll_interval: Duration,
}

impl ProcessLock {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_LOCK_POLL,
        }
    }

    /// Lock located at `<dir>/.access_token.lock`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(LOCK_FILE))
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether some process currently holds the marker.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.path.is_file()
    }

    /// Makes a single acquisition attempt.
    ///
    /// # Errors
    ///
    /// Returns an error for I/O failures other than the marker already
    /// existing.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                // Informational only; ownership is the file's existence.
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Some(LockGuard {
                    path: self.path.clone(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Waits until the marker can be created, polling at the configured
    /// interval. Never times out.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be created for a reason other
    /// than contention.
    pub async fn acquire(&self) -> Result<LockGuard> {
        let mut announced = false;
        loop {
            if let Some(guard) = self.try_acquire()? {
                log::debug!("Acquired authorization lock '{}'", self.path.display());
                return Ok(guard);
            }
            if !announced {
                log::info!(
                    "Another process is authorizing, waiting for '{}'",
                    self.path.display()
                );
                announced = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Removes the marker regardless of who holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker exists but cannot be removed.
    pub fn force_release(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Proof of holding the lock; the marker is removed when dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Releases the lock now instead of at drop.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "Failed to release authorization lock '{}': {e}",
                    self.path.display()
                );
            }
        } else {
            log::debug!("Released authorization lock '{}'", self.path.display());
        }
    }
}
