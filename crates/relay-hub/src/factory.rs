//! Turns a published configuration generation into per-relay config tasks.
//!
//! For every relay the factory archives `<serial>/relays/<relay_id>/` and
//! queues it as a `relay_config` task. A relay never gets a second pending
//! task for the same serial: a cheap check skips the archive work, and the
//! final insert re-checks under the repository's exclusive access.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use relay_hub_types::{CONFIG_ARCHIVE_ROOT_FOLDER_NAME, RelayId, RelayTask, TaskSpec};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::config_path::{ConfigPathError, ConfigPathStore, VersionedConfigPath};
use crate::edition::Edition;
use crate::relays::RelaysRepository;
use crate::tasks::{TaskError, TasksRepository, new_task_id};

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error(transparent)]
    ConfigPath(#[from] ConfigPathError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error("failed to archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct ConfigTaskFactory {
    config_paths: ConfigPathStore,
    relays: Arc<dyn RelaysRepository>,
    tasks: TasksRepository,
    edition: Edition,
}

impl ConfigTaskFactory {
    pub fn new(
        config_paths: ConfigPathStore,
        relays: Arc<dyn RelaysRepository>,
        tasks: TasksRepository,
        edition: Edition,
    ) -> Self {
        Self {
            config_paths,
            relays,
            tasks,
            edition,
        }
    }

    pub fn edition(&self) -> Edition {
        self.edition
    }

    /// Serial of the current generation, `None` before the first publication.
    pub fn retrieve_config_serial(&self) -> Result<Option<u64>, FactoryError> {
        Ok(self.config_paths.latest_serial()?)
    }

    /// Queue the current generation for every known relay.
    ///
    /// Relays that already have it pending, or have no config subtree, are
    /// skipped. A relay whose task cannot be built or stored (task limit,
    /// unreadable subtree, storage failure) is logged and skipped without
    /// affecting the others. Only failing to resolve the current generation
    /// aborts the run.
    pub fn create_for_all_relays(&self) -> Result<Vec<RelayTask>, FactoryError> {
        let relay_ids = self.relays.relay_ids();
        let Some(config) = self.current_config()? else {
            return Ok(Vec::new());
        };

        let mut created = Vec::new();
        for relay_id in &relay_ids {
            match self.create_task(&config, relay_id) {
                Ok(Some(task)) => created.push(task),
                Ok(None) => {}
                Err(e @ FactoryError::ConfigPath(_)) => return Err(e),
                Err(e) => {
                    warn!(relay_id = %relay_id, serial = config.serial(), error = %e, "Cannot queue config task");
                }
            }
        }

        info!(
            serial = config.serial(),
            relays = relay_ids.len(),
            created = created.len(),
            "Created relay config tasks"
        );
        Ok(created)
    }

    /// Queue the current generation for one relay.
    ///
    /// Returns `Ok(None)` when there is nothing to do: the task is already
    /// pending, the relay has no config subtree, no generation exists yet,
    /// or the edition does not distribute relay configuration.
    pub fn create_for_relay(&self, relay_id: &RelayId) -> Result<Option<RelayTask>, FactoryError> {
        match self.current_config()? {
            Some(config) => self.create_task(&config, relay_id),
            None => Ok(None),
        }
    }

    fn current_config(&self) -> Result<Option<VersionedConfigPath>, FactoryError> {
        if !self.edition.supports_relay_config() {
            debug!(edition = %self.edition, "Edition does not distribute relay configuration");
            return Ok(None);
        }
        let Some(serial) = self.retrieve_config_serial()? else {
            debug!("No configuration published yet");
            return Ok(None);
        };
        Ok(Some(self.config_paths.at_serial(serial)))
    }

    fn create_task(
        &self,
        config: &VersionedConfigPath,
        relay_id: &RelayId,
    ) -> Result<Option<RelayTask>, FactoryError> {
        let serial = config.serial();
        let is_pending_for_serial =
            |tasks: &[RelayTask]| tasks.iter().any(|t| t.is_pending_config_for(serial));

        if is_pending_for_serial(self.tasks.get_tasks(relay_id)?.as_slice()) {
            debug!(relay_id = %relay_id, serial, "Config task already pending");
            return Ok(None);
        }

        let source = config.relay_config_dir(relay_id);
        let has_config = has_entries(&source).map_err(|e| FactoryError::Archive {
            path: source.clone(),
            source: e,
        })?;
        if !has_config {
            debug!(relay_id = %relay_id, serial, path = %source.display(), "No relay config to distribute");
            return Ok(None);
        }

        let tar_data = create_tar(&source).map_err(|e| FactoryError::Archive {
            path: source.clone(),
            source: e,
        })?;
        let task = RelayTask::pending(
            new_task_id(),
            TaskSpec::RelayConfig { serial, tar_data },
            Utc::now(),
        );

        let span = info_span!("config_task", task_id = %task.id);
        let _entered = span.enter();
        let stored = self
            .tasks
            .store_task_if(relay_id, task.clone(), |tasks| !is_pending_for_serial(tasks))?;
        if !stored {
            debug!(relay_id = %relay_id, serial, "Config task queued concurrently");
            return Ok(None);
        }
        info!(relay_id = %relay_id, serial, "Queued relay config task");
        Ok(Some(task))
    }
}

/// Archive the directory `parent` as an uncompressed tar, in memory.
///
/// The archive's single top-level directory is named
/// [`CONFIG_ARCHIVE_ROOT_FOLDER_NAME`] regardless of where `parent` lives.
/// Symlinks are stored as links, not followed.
pub fn create_tar(parent: &Path) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(CONFIG_ARCHIVE_ROOT_FOLDER_NAME, parent)?;
    builder.into_inner()
}

/// Whether `dir` holds anything. A missing directory counts as empty.
fn has_entries(dir: &Path) -> io::Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().transpose()?.is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
