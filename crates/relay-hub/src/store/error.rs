//! Storage error types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {timeout:?} waiting for lock {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("corrupt object at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl StorageError {
    pub fn file_io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn corrupt(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }
}
