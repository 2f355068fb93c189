//! Advisory file locks (`flock(2)`).
//!
//! Locks are taken on a sidecar file, never on the data file itself: the
//! data file is replaced by rename on every write, which would leave a lock
//! holder attached to a stale inode.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use super::error::{StorageError, StorageResult};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exclusive lock held until drop.
///
/// Works across processes and across threads of one process, since every
/// acquisition opens its own file description.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on `path`, creating the file if needed.
    ///
    /// With `timeout = None` this blocks until the current holder releases
    /// the lock, however long that takes.
    pub fn acquire(path: &Path, timeout: Option<Duration>) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::file_io(path, e))?;

        match timeout {
            None => flock(&file, libc::LOCK_EX).map_err(|e| StorageError::file_io(path, e))?,
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !try_lock_exclusive(&file).map_err(|e| StorageError::file_io(path, e))? {
                    if Instant::now() >= deadline {
                        return Err(StorageError::LockTimeout {
                            path: path.to_path_buf(),
                            timeout,
                        });
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
            }
        }

        debug!(path = %path.display(), "Acquired lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Take the lock only if nobody holds it right now.
    pub fn try_acquire(path: &Path) -> StorageResult<Option<Self>> {
        match Self::acquire(path, Some(Duration::ZERO)) {
            Ok(lock) => Ok(Some(lock)),
            Err(StorageError::LockTimeout { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = flock(&self.file, libc::LOCK_UN);
    }
}

fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    match flock(file, libc::LOCK_EX | libc::LOCK_NB) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    loop {
        // SAFETY: the descriptor is owned by `file`, which outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
