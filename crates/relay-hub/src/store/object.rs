//! Single-object documents with locked read-modify-write.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::{StorageError, StorageResult};
use super::lock::FileLock;

/// Write data to a temp file, fsync it, then atomically rename to the final path.
///
/// The temp file name is generated internally using a ULID to avoid collisions
/// from concurrent writers targeting the same final path.
pub fn atomic_write_file(final_path: &Path, data: &[u8]) -> StorageResult<()> {
    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    let temp_path = final_path.with_file_name(format!(".{}.{}.tmp", file_name, ulid::Ulid::new()));

    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    };
    if let Err(e) = write() {
        let _ = fs::remove_file(&temp_path);
        return Err(StorageError::file_io(&temp_path, e));
    }
    fs::rename(&temp_path, final_path).map_err(|e| StorageError::file_io(final_path, e))
}

/// On-disk encoding of an object.
pub trait ObjectFormat: Clone + Send + Sync + 'static {
    type Object;

    /// Value used when the file does not exist yet.
    fn empty(&self) -> Self::Object;
    fn parse(&self, raw: &[u8]) -> Result<Self::Object, String>;
    fn render(&self, object: &Self::Object) -> Result<Vec<u8>, String>;
}

/// A single decimal integer, as used by the serial counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialFormat;

impl ObjectFormat for SerialFormat {
    type Object = u64;

    fn empty(&self) -> u64 {
        0
    }

    fn parse(&self, raw: &[u8]) -> Result<u64, String> {
        let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(0);
        }
        text.parse::<u64>()
            .map_err(|e| format!("invalid serial {text:?}: {e}"))
    }

    fn render(&self, object: &u64) -> Result<Vec<u8>, String> {
        Ok(format!("{object}\n").into_bytes())
    }
}

/// Pretty-printed JSON of any serde type.
pub struct JsonFormat<T>(PhantomData<fn() -> T>);

impl<T> JsonFormat<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonFormat<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonFormat<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonFormat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonFormat")
    }
}

impl<T> ObjectFormat for JsonFormat<T>
where
    T: Serialize + DeserializeOwned + Default + 'static,
{
    type Object = T;

    fn empty(&self) -> T {
        T::default()
    }

    fn parse(&self, raw: &[u8]) -> Result<T, String> {
        serde_json::from_slice(raw).map_err(|e| e.to_string())
    }

    fn render(&self, object: &T) -> Result<Vec<u8>, String> {
        serde_json::to_vec_pretty(object).map_err(|e| e.to_string())
    }
}

/// A file holding one object, guarded by a sidecar lock file.
///
/// Reads never take the lock: writes replace the file by rename, so a
/// reader sees either the old or the new content in full.
#[derive(Clone)]
pub struct ObjectStore<F: ObjectFormat> {
    path: PathBuf,
    lock_path: PathBuf,
    format: F,
    lock_timeout: Option<Duration>,
}

impl<F: ObjectFormat> ObjectStore<F> {
    pub fn new(path: impl Into<PathBuf>, format: F) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock_path,
            format,
            lock_timeout: None,
        }
    }

    /// Bound lock acquisition; `None` blocks indefinitely.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> StorageResult<F::Object> {
        match fs::read(&self.path) {
            Ok(raw) => self
                .format
                .parse(&raw)
                .map_err(|e| StorageError::corrupt(&self.path, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(self.format.empty()),
            Err(e) => Err(StorageError::file_io(&self.path, e)),
        }
    }

    pub fn write(&self, object: &F::Object) -> StorageResult<()> {
        self.lock()?.write(object)
    }

    /// Take the exclusive lock. Other writers block until the guard drops.
    pub fn lock(&self) -> StorageResult<LockedObject<F>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::file_io(parent, e))?;
        }
        let lock = FileLock::acquire(&self.lock_path, self.lock_timeout)?;
        Ok(LockedObject {
            store: self.clone(),
            _lock: lock,
        })
    }

    /// Take the exclusive lock if it is free, without waiting.
    pub fn try_lock(&self) -> StorageResult<Option<LockedObject<F>>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::file_io(parent, e))?;
        }
        Ok(FileLock::try_acquire(&self.lock_path)?.map(|lock| LockedObject {
            store: self.clone(),
            _lock: lock,
        }))
    }

    /// Locked read-modify-write.
    pub fn update<R>(&self, f: impl FnOnce(&mut F::Object) -> R) -> StorageResult<R> {
        let locked = self.lock()?;
        let mut object = locked.read()?;
        let result = f(&mut object);
        locked.write(&object)?;
        Ok(result)
    }
}

/// An [`ObjectStore`] whose lock is held by this guard.
pub struct LockedObject<F: ObjectFormat> {
    store: ObjectStore<F>,
    _lock: FileLock,
}

impl<F: ObjectFormat> LockedObject<F> {
    pub fn read(&self) -> StorageResult<F::Object> {
        self.store.read()
    }

    pub fn write(&self, object: &F::Object) -> StorageResult<()> {
        let data = self
            .store
            .format
            .render(object)
            .map_err(|e| StorageError::corrupt(&self.store.path, e))?;
        atomic_write_file(&self.store.path, &data)
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("object");
    path.with_file_name(format!("{file_name}.lock"))
}
