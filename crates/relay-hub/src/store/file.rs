use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_hub_types::{RelayId, RelayTask};

use super::TaskStore;
use super::error::StorageResult;
use super::object::{JsonFormat, ObjectStore};

/// Task lists stored as one JSON document per relay (`<dir>/<relay_id>.json`).
///
/// Mutations hold the document's file lock, so several server processes
/// can share one directory.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    dir: PathBuf,
    lock_timeout: Option<Duration>,
}

impl FileTaskStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout: None,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document(&self, relay_id: &RelayId) -> ObjectStore<JsonFormat<Vec<RelayTask>>> {
        // RelayId only admits path-safe characters.
        ObjectStore::new(
            self.dir.join(format!("{}.json", relay_id.as_str())),
            JsonFormat::new(),
        )
        .with_lock_timeout(self.lock_timeout)
    }
}

impl TaskStore for FileTaskStore {
    fn load(&self, relay_id: &RelayId) -> StorageResult<Vec<RelayTask>> {
        self.document(relay_id).read()
    }

    fn modify(
        &self,
        relay_id: &RelayId,
        apply: &mut dyn FnMut(&mut Vec<RelayTask>),
    ) -> StorageResult<()> {
        self.document(relay_id).update(|tasks| apply(tasks))
    }
}
