use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::HistoryError;

pub const LOCK_FILE_NAME: &str = ".covtrend.lock";

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_RETRY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Held by writers that only add files.
    Shared,
    /// Held by cleanup, which deletes files.
    Exclusive,
}

/// Advisory lock on the storage directory, released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl StoreLock {
    pub fn acquire(dir: &Path, mode: LockMode) -> Result<Self, HistoryError> {
        Self::acquire_with_timeout(dir, mode, LOCK_TIMEOUT)
    }

    pub fn acquire_with_timeout(
        dir: &Path,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<Self, HistoryError> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| {
                HistoryError::io(format!("failed to open lock file {}", path.display()), source)
            })?;

        let start = Instant::now();
        loop {
            let result = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match result {
                Ok(()) => break,
                Err(err) if is_contended(&err) => {
                    if start.elapsed() >= timeout {
                        return Err(HistoryError::LockTimeout {
                            path,
                            waited_secs: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(LOCK_RETRY);
                }
                Err(err) => {
                    return Err(HistoryError::io(
                        format!("failed to lock {}", path.display()),
                        err,
                    ));
                }
            }
        }

        tracing::debug!(path = %path.display(), ?mode, "acquired store lock");
        Ok(Self { file, path, mode })
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %err, path = %self.path.display(), "failed to release store lock");
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn shared_locks_coexist_and_block_exclusive() {
        let temp = tempdir().expect("tempdir");
        let first = StoreLock::acquire(temp.path(), LockMode::Shared).expect("first shared");
        let second = StoreLock::acquire(temp.path(), LockMode::Shared).expect("second shared");
        assert_eq!(first.mode(), LockMode::Shared);
        assert!(first.path().ends_with(LOCK_FILE_NAME));

        let err = StoreLock::acquire_with_timeout(
            temp.path(),
            LockMode::Exclusive,
            Duration::from_millis(120),
        )
        .expect_err("exclusive lock should time out");
        assert!(matches!(err, HistoryError::LockTimeout { .. }));

        drop(first);
        drop(second);
        StoreLock::acquire(temp.path(), LockMode::Exclusive).expect("exclusive after release");
    }
}
