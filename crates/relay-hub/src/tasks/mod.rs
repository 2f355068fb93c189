//! Per-relay task queues.
//!
//! Each relay owns a bounded list of tasks. A task starts `PENDING` and is
//! finished exactly once, as `OK` or `FAILED`, by the relay reporting back.
//! Only pending tasks count against the per-relay limit, so finishing a
//! task frees its slot immediately. Finished tasks stay in the current view
//! for `finished_task_ttl`; after that they only show up in the relay's
//! full history. Nothing is ever deleted from the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_hub_types::{RelayId, RelayTask, ResultType, TaskId, TaskStatus};
use thiserror::Error;
use tracing::{debug, info};

use crate::store::{MemoryTaskStore, StorageError, TaskStore};

/// Default per-relay limit of pending tasks.
pub const DEFAULT_MAX_NUMBER_OF_TASKS: usize = 10;
/// Default retention of finished tasks (1 hour).
pub const DEFAULT_FINISHED_TASK_TTL: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct TasksSettings {
    pub max_number_of_tasks: usize,
    pub finished_task_ttl: Duration,
}

impl Default for TasksSettings {
    fn default() -> Self {
        Self {
            max_number_of_tasks: DEFAULT_MAX_NUMBER_OF_TASKS,
            finished_task_ttl: DEFAULT_FINISHED_TASK_TTL,
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    /// The relay already holds `limit` pending tasks.
    #[error("The maximum number of tasks {limit} has been reached")]
    LimitReached { limit: usize },

    #[error("Task {task_id} not found for relay {relay_id}")]
    NotFound { relay_id: RelayId, task_id: TaskId },

    #[error("Task {task_id} is already finished with status {status}")]
    AlreadyFinished { task_id: TaskId, status: TaskStatus },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Generate a unique task id (lowercase ULID).
pub fn new_task_id() -> TaskId {
    TaskId::from(ulid::Ulid::new().to_string().to_lowercase())
}

// ============================================================================
// TasksRepository
// ============================================================================

/// Bounded task queues for all relays. Cheap to clone.
#[derive(Clone)]
pub struct TasksRepository {
    store: Arc<dyn TaskStore>,
    settings: TasksSettings,
}

impl TasksRepository {
    pub fn new(store: Arc<dyn TaskStore>, settings: TasksSettings) -> Self {
        Self { store, settings }
    }

    pub fn in_memory(settings: TasksSettings) -> Self {
        Self::new(Arc::new(MemoryTaskStore::new()), settings)
    }

    pub fn settings(&self) -> TasksSettings {
        self.settings
    }

    /// Queue `task` for `relay_id`.
    ///
    /// Fails with [`TaskError::LimitReached`] when the relay already holds
    /// `max_number_of_tasks` pending tasks.
    pub fn store_task(&self, relay_id: &RelayId, task: RelayTask) -> Result<(), TaskError> {
        self.store_task_if(relay_id, task, |_| true).map(|_| ())
    }

    /// Queue `task` only if `accept` approves the relay's current tasks.
    ///
    /// The check and the insert happen under the store's exclusive access,
    /// so two callers racing with the same predicate cannot both insert.
    /// Returns `Ok(false)` when `accept` declined.
    pub fn store_task_if(
        &self,
        relay_id: &RelayId,
        task: RelayTask,
        accept: impl Fn(&[RelayTask]) -> bool,
    ) -> Result<bool, TaskError> {
        let limit = self.settings.max_number_of_tasks;
        let task_id = task.id.clone();
        let mut task = Some(task);
        let mut outcome = Ok(false);

        self.store.modify(relay_id, &mut |tasks| {
            outcome = if !accept(tasks) {
                Ok(false)
            } else if pending_count(tasks) >= limit {
                Err(TaskError::LimitReached { limit })
            } else {
                tasks.extend(task.take());
                Ok(true)
            };
        })?;

        if matches!(outcome, Ok(true)) {
            debug!(relay_id = %relay_id, task_id = %task_id, "Stored task");
        }
        outcome
    }

    /// All tracked tasks of the relay: pending ones plus finished ones still
    /// within their retention period. Order is unspecified.
    pub fn get_tasks(&self, relay_id: &RelayId) -> Result<Vec<RelayTask>, TaskError> {
        let now = Utc::now();
        let mut tasks = self.store.load(relay_id)?;
        tasks.retain(|t| !is_expired(t, now, self.settings.finished_task_ttl));
        Ok(tasks)
    }

    /// Every task ever stored for the relay, including finished ones past
    /// their retention period, in insertion order.
    pub fn get_task_history(&self, relay_id: &RelayId) -> Result<Vec<RelayTask>, TaskError> {
        Ok(self.store.load(relay_id)?)
    }

    pub fn get_tasks_with_status(
        &self,
        relay_id: &RelayId,
        status: TaskStatus,
    ) -> Result<Vec<RelayTask>, TaskError> {
        let mut tasks = self.get_tasks(relay_id)?;
        tasks.retain(|t| t.status == status);
        Ok(tasks)
    }

    pub fn get_task(&self, relay_id: &RelayId, task_id: &TaskId) -> Result<RelayTask, TaskError> {
        self.get_tasks(relay_id)?
            .into_iter()
            .find(|t| &t.id == task_id)
            .ok_or_else(|| TaskError::NotFound {
                relay_id: relay_id.clone(),
                task_id: task_id.clone(),
            })
    }

    /// Finish a pending task with the relay's result.
    pub fn update_task(
        &self,
        relay_id: &RelayId,
        task_id: &TaskId,
        result_type: ResultType,
        result_payload: Option<String>,
    ) -> Result<RelayTask, TaskError> {
        let now = Utc::now();
        let mut result_payload = result_payload;
        let mut outcome = Err(TaskError::NotFound {
            relay_id: relay_id.clone(),
            task_id: task_id.clone(),
        });

        self.store.modify(relay_id, &mut |tasks| {
            let Some(task) = tasks.iter_mut().find(|t| &t.id == task_id) else {
                return;
            };
            if task.status.is_terminal() {
                outcome = Err(TaskError::AlreadyFinished {
                    task_id: task_id.clone(),
                    status: task.status,
                });
                return;
            }
            task.status = result_type.into();
            task.update_timestamp = now;
            task.result_payload = result_payload.take();
            outcome = Ok(task.clone());
        })?;

        if let Ok(task) = &outcome {
            info!(relay_id = %relay_id, task_id = %task_id, status = %task.status, "Task finished");
        }
        outcome
    }
}

fn pending_count(tasks: &[RelayTask]) -> usize {
    tasks.iter().filter(|t| t.is_pending()).count()
}

fn is_expired(task: &RelayTask, now: DateTime<Utc>, ttl: Duration) -> bool {
    task.status.is_terminal()
        && (now - task.update_timestamp)
            .to_std()
            .is_ok_and(|age| age > ttl)
}

#[cfg(test)]
mod tests;
