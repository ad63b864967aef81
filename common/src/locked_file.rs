//! Scoped advisory file locking.
//!
//! A [`LockedFile`] holds a `flock` on an open file for as long as it lives.
//! Locks are advisory and only coordinate processes on the same host that
//! go through this type (or call `flock` themselves). Acquisition never
//! blocks: a held lock is retried a bounded number of times with a fixed
//! delay and then reported as [`CommonError::LockContention`].

use crate::error::{CommonError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Read access; many holders at once.
    Shared,
    /// Write access; excludes every other holder.
    Exclusive,
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_BACKOFF)
    }
}

#[derive(Debug)]
pub struct LockedFile {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl LockedFile {
    /// Opens `path` and takes a lock in `mode`.
    ///
    /// Shared access never creates the file: a missing file fails
    /// immediately with a `NotFound` I/O error (see
    /// [`CommonError::is_not_found`]). Exclusive access creates the file if
    /// needed but never truncates it before the lock is held.
    pub fn acquire<P: AsRef<Path>>(path: P, mode: LockMode, policy: &RetryPolicy) -> Result<Self> {
        let path = path.as_ref();
        let attempts = policy.attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let last_attempt = attempt == attempts;

            let file = match open_for(path, mode) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && mode == LockMode::Shared => {
                    return Err(CommonError::Io(e));
                }
                Err(e) if last_attempt => {
                    return Err(CommonError::Open {
                        path: path.to_path_buf(),
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    debug!(path = %path.display(), attempt, error = %e, "open failed, retrying");
                    thread::sleep(policy.backoff);
                    continue;
                }
            };

            // UFCS keeps these on fs2 rather than the inherent std::fs::File locking methods.
            let locked = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };

            match locked {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                        mode,
                    });
                }
                Err(e) if last_attempt => {
                    warn!(path = %path.display(), ?mode, attempts, "giving up on file lock");
                    return Err(CommonError::LockContention {
                        path: path.to_path_buf(),
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    debug!(path = %path.display(), attempt, ?mode, error = %e, "lock busy, retrying");
                    drop(file);
                    thread::sleep(policy.backoff);
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn read_to_string(&mut self) -> Result<String> {
        let mut content = String::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut content)?;
        Ok(content)
    }

    /// Replaces the whole file with `content` and syncs it to disk.
    ///
    /// Requires [`LockMode::Exclusive`].
    pub fn replace_contents(&mut self, content: &[u8]) -> Result<()> {
        if self.mode != LockMode::Exclusive {
            return Err(CommonError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("{} is not locked for writing", self.path.display()),
            )));
        }

        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(content)?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release file lock");
        }
    }
}

fn open_for(path: &Path, mode: LockMode) -> std::io::Result<File> {
    match mode {
        LockMode::Shared => OpenOptions::new().read(true).open(path),
        LockMode::Exclusive => OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path),
    }
}
