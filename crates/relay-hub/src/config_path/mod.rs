//! Versioned configuration generations.
//!
//! Every activation publishes a complete configuration tree into a fresh,
//! serial-numbered directory and then repoints `latest` at it:
//!
//! ```text
//! <base>/var/check_mk/core/helper_config/
//! ├── serial.mk        last serial handed out
//! ├── serial.mk.lock   lock serializing activations
//! ├── latest -> 42     current generation
//! ├── 41/
//! └── 42/
//!     └── relays/<relay_id>/...
//! ```
//!
//! `latest` only ever names a generation whose directory was fully written.
//! A failed activation leaves its directory behind but never becomes
//! visible. [`ConfigPathStore::cleanup_old_configs`] removes it on the next
//! run that finds no activation holding `serial.mk.lock`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_hub_types::RelayId;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{LockedObject, ObjectStore, SerialFormat, StorageError};

mod latest;

pub use latest::LatestPointer;

/// Location of the generations below the site root.
pub const HELPER_CONFIG_DIR: &str = "var/check_mk/core/helper_config";
pub const LATEST_LINK_NAME: &str = "latest";
pub const SERIAL_FILE_NAME: &str = "serial.mk";
/// Per-generation folder holding one subtree per relay.
pub const RELAYS_DIR_NAME: &str = "relays";

pub fn helper_config_root(base: &Path) -> PathBuf {
    base.join(HELPER_CONFIG_DIR)
}

// ============================================================================
// VersionedConfigPath
// ============================================================================

/// One numbered configuration generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedConfigPath {
    base: PathBuf,
    serial: u64,
}

impl VersionedConfigPath {
    pub fn new(base: impl Into<PathBuf>, serial: u64) -> Self {
        Self {
            base: base.into(),
            serial,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn root(&self) -> PathBuf {
        helper_config_root(&self.base)
    }

    /// `<root>/<serial>`
    pub fn path(&self) -> PathBuf {
        self.root().join(self.serial.to_string())
    }

    pub fn relays_dir(&self) -> PathBuf {
        self.path().join(RELAYS_DIR_NAME)
    }

    pub fn relay_config_dir(&self, relay_id: &RelayId) -> PathBuf {
        self.relays_dir().join(relay_id.as_str())
    }
}

// ============================================================================
// ConfigPathError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigPathError {
    #[error("config path I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("latest link {path} has unexpected target {target:?}")]
    InvalidLatest { path: PathBuf, target: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ConfigPathError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// True when a path involved did not exist (e.g. a dangling `latest`).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == ErrorKind::NotFound)
    }
}

// ============================================================================
// ConfigPathStore
// ============================================================================

/// Publishes and prunes configuration generations for one site.
#[derive(Clone)]
pub struct ConfigPathStore {
    base: PathBuf,
    root: PathBuf,
    serial: ObjectStore<SerialFormat>,
    latest: LatestPointer,
}

impl ConfigPathStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let root = helper_config_root(&base);
        Self {
            serial: ObjectStore::new(root.join(SERIAL_FILE_NAME), SerialFormat),
            latest: LatestPointer::new(root.join(LATEST_LINK_NAME)),
            base,
            root,
        }
    }

    /// Bound the wait for the activation lock. `None` (the default) blocks
    /// until the holder releases it, with no upper limit.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.serial = self.serial.with_lock_timeout(timeout);
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn latest_pointer(&self) -> &LatestPointer {
        &self.latest
    }

    pub fn at_serial(&self, serial: u64) -> VersionedConfigPath {
        VersionedConfigPath::new(&self.base, serial)
    }

    /// Resolve `latest` to the directory of the current generation.
    ///
    /// The target can vanish between publication and this call (the core
    /// prunes generations concurrently); that surfaces as a not-found I/O
    /// error and callers are expected to retry.
    pub fn detect_latest_config_path(&self) -> Result<PathBuf, ConfigPathError> {
        self.latest
            .resolve()
            .map_err(|e| ConfigPathError::io(self.latest.link(), e))
    }

    /// Serial of the current generation, `None` before the first publication.
    pub fn latest_serial(&self) -> Result<Option<u64>, ConfigPathError> {
        self.latest.serial()
    }

    pub fn latest(&self) -> Result<Option<VersionedConfigPath>, ConfigPathError> {
        Ok(self.latest_serial()?.map(|serial| self.at_serial(serial)))
    }

    /// Start a new generation.
    ///
    /// Blocks on the activation lock, bumps `serial.mk` and prepares an
    /// empty directory for the new serial. The lock stays held until the
    /// returned [`ConfigCreation`] is committed or dropped, so concurrent
    /// activations are strictly serialized.
    pub fn create(&self) -> Result<ConfigCreation, ConfigPathError> {
        fs::create_dir_all(&self.root).map_err(|e| ConfigPathError::io(&self.root, e))?;

        let serial_lock = self.serial.lock()?;
        let serial = serial_lock.read()? + 1;
        serial_lock.write(&serial)?;

        let path_active = self.latest.serial()?.map(|s| self.root.join(s.to_string()));
        let created = self.at_serial(serial);
        let dir = created.path();

        match fs::remove_dir_all(&dir) {
            Ok(()) => warn!(serial, path = %dir.display(), "Removed stale leftover generation"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigPathError::io(&dir, e)),
        }
        fs::create_dir(&dir).map_err(|e| ConfigPathError::io(&dir, e))?;

        debug!(serial, path = %dir.display(), "Started configuration generation");
        Ok(ConfigCreation {
            path_active,
            created,
            latest: self.latest.clone(),
            _serial_lock: serial_lock,
            committed: false,
        })
    }

    /// Run `write` against a new generation and publish it if `write` succeeds.
    ///
    /// On error nothing is published and `latest` keeps its old target.
    pub fn publish<T, E>(
        &self,
        write: impl FnOnce(&ConfigCreation) -> Result<T, E>,
    ) -> Result<(VersionedConfigPath, T), E>
    where
        E: From<ConfigPathError>,
    {
        let creation = self.create()?;
        let value = write(&creation)?;
        let published = creation.commit()?;
        Ok((published, value))
    }

    /// Publish a copy of the directory tree at `source` as a new generation.
    pub fn publish_dir(&self, source: &Path) -> Result<VersionedConfigPath, ConfigPathError> {
        let (published, files) =
            self.publish(|creation| copy_tree(source, &creation.path_created()))?;
        debug!(serial = published.serial(), files, "Copied configuration tree");
        Ok(published)
    }

    /// Delete superseded generations.
    ///
    /// Everything except the target of `latest` is removed. When an
    /// activation holds the serial lock, directories with a serial above
    /// the current one belong to it and are kept; otherwise they are
    /// leftovers of failed activations and go too. The lock is held for the
    /// whole sweep when it was free, so `latest` cannot move meanwhile.
    /// Without a `latest` link nothing is deleted.
    pub fn cleanup_old_configs(&self) -> Result<Vec<PathBuf>, ConfigPathError> {
        let idle_lock = self.serial.try_lock()?;
        let activation_running = idle_lock.is_none();
        let latest = match self.latest.resolve() {
            Ok(path) => path,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(root = %self.root.display(), "No latest configuration, skipping cleanup");
                return Ok(Vec::new());
            }
            Err(e) => return Err(ConfigPathError::io(self.latest.link(), e)),
        };
        let latest_serial = latest
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<u64>().ok());

        let entries = fs::read_dir(&self.root).map_err(|e| ConfigPathError::io(&self.root, e))?;
        let mut removed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ConfigPathError::io(&self.root, e))?;
            let path = entry.path();
            if entry.file_name() == LATEST_LINK_NAME {
                continue;
            }
            let file_type = entry.file_type().map_err(|e| ConfigPathError::io(&path, e))?;
            if file_type.is_symlink() || !file_type.is_dir() {
                continue;
            }
            if path.canonicalize().is_ok_and(|p| p == latest) {
                continue;
            }
            let serial = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok());
            if activation_running
                && let (Some(serial), Some(current)) = (serial, latest_serial)
                && serial > current
            {
                debug!(serial, "Keeping in-progress generation");
                continue;
            }

            match fs::remove_dir_all(&path) {
                Ok(()) => removed.push(path),
                // Removed concurrently by someone else.
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(ConfigPathError::io(&path, e)),
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "Removed old configuration generations");
        }
        Ok(removed)
    }
}

/// Recursively copy `from` into the existing directory `to`. Symlinks are
/// recreated, not followed. Returns the number of regular files copied.
fn copy_tree(from: &Path, to: &Path) -> Result<usize, ConfigPathError> {
    let mut copied = 0;
    for entry in fs::read_dir(from).map_err(|e| ConfigPathError::io(from, e))? {
        let entry = entry.map_err(|e| ConfigPathError::io(from, e))?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| ConfigPathError::io(&src, e))?;

        if file_type.is_symlink() {
            let target = fs::read_link(&src).map_err(|e| ConfigPathError::io(&src, e))?;
            std::os::unix::fs::symlink(&target, &dst).map_err(|e| ConfigPathError::io(&dst, e))?;
        } else if file_type.is_dir() {
            fs::create_dir(&dst).map_err(|e| ConfigPathError::io(&dst, e))?;
            copied += copy_tree(&src, &dst)?;
        } else {
            fs::copy(&src, &dst).map_err(|e| ConfigPathError::io(&dst, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

// ============================================================================
// ConfigCreation
// ============================================================================

/// A generation being written. Holds the activation lock.
///
/// [`commit`](Self::commit) repoints `latest`; dropping without committing
/// abandons the generation and leaves `latest` where it was.
pub struct ConfigCreation {
    path_active: Option<PathBuf>,
    created: VersionedConfigPath,
    latest: LatestPointer,
    _serial_lock: LockedObject<SerialFormat>,
    committed: bool,
}

impl ConfigCreation {
    /// Directory of the generation that was current when this one started.
    pub fn path_active(&self) -> Option<&Path> {
        self.path_active.as_deref()
    }

    /// Directory to write the new generation into.
    pub fn path_created(&self) -> PathBuf {
        self.created.path()
    }

    pub fn serial_created(&self) -> u64 {
        self.created.serial()
    }

    pub fn config_path(&self) -> &VersionedConfigPath {
        &self.created
    }

    /// Publish the generation by pointing `latest` at it.
    pub fn commit(mut self) -> Result<VersionedConfigPath, ConfigPathError> {
        let serial = self.created.serial();
        self.latest
            .set(serial)
            .map_err(|e| ConfigPathError::io(self.latest.link(), e))?;
        self.committed = true;
        info!(serial, "Published configuration generation");
        Ok(self.created.clone())
    }
}

impl Drop for ConfigCreation {
    fn drop(&mut self) {
        if !self.committed {
            warn!(
                serial = self.created.serial(),
                "Configuration generation abandoned, latest left unchanged"
            );
        }
    }
}
