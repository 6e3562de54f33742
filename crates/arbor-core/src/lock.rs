//! Advisory locking for mutable repository state.
//!
//! Uses advisory file locks (`flock(2)` on Unix) via the `fs2` crate.
//! The OS automatically releases locks when a process crashes, so no
//! PID tracking or stale lock detection is needed.
//!
//! Locks are named so that independent concerns never contend: each
//! branch gets its own lock file, repository metadata another, and the
//! pull-request store a third. There is no global lock anywhere.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{ArborError, ArborResult};

/// An exclusive advisory lock.
///
/// Held for the lifetime of the value. When dropped, the lock is
/// released automatically (both the `flock` and the `File` handle).
pub struct RepoLock {
    _file: File,
}

impl RepoLock {
    /// Acquire the named exclusive lock under `dir`.
    ///
    /// Polls with a short sleep interval until the lock is acquired or
    /// the timeout expires. Returns `ArborError::LockTimeout` on
    /// failure; the lock name is carried in the error so the caller can
    /// tell which resource was contended.
    pub fn acquire(dir: &Path, name: &str, timeout: Duration) -> ArborResult<Self> {
        let lock_path = dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        let start = Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(RepoLock { _file: file }),
                Err(_) if start.elapsed() >= timeout => {
                    return Err(ArborError::LockTimeout(name.to_string()));
                }
                Err(_) => std::thread::sleep(poll_interval),
            }
        }
    }
}
