//! Advisory file locks.

use anyhow::{Context, Result, bail};
use fs2::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::RealRuntime;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An exclusive lock, released on drop.
#[derive(Debug, Default)]
pub struct FileLock {
    file: Option<File>,
    path: PathBuf,
}

impl FileLock {
    /// A lock that holds nothing, for callers that do not need real locking.
    pub fn detached() -> Self {
        FileLock::default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                debug!("Failed to unlock {}: {}", self.path.display(), e);
            }
        }
    }
}

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn lock_exclusive_impl(&self, path: &Path, timeout: Duration) -> Result<FileLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;
        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(FileLock {
                        file: Some(file),
                        path: path.to_path_buf(),
                    });
                }
                Err(_) if start.elapsed() < timeout => thread::sleep(POLL_INTERVAL),
                Err(e) => bail!(
                    "Timed out after {:?} waiting for lock {}: {}",
                    timeout,
                    path.display(),
                    e
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let runtime = RealRuntime;
        let dir = tempdir().unwrap();
        let path = dir.path().join("user.config.lock");

        let lock = runtime.lock_exclusive(&path, Duration::from_millis(100)).unwrap();
        assert_eq!(lock.path(), path);

        let err = runtime
            .lock_exclusive(&path, Duration::from_millis(100))
            .unwrap_err();
        assert!(err.to_string().contains("Timed out"));

        drop(lock);
        assert!(runtime.lock_exclusive(&path, Duration::from_millis(100)).is_ok());
    }
}
