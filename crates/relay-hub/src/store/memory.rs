use dashmap::DashMap;
use relay_hub_types::{RelayId, RelayTask};

use super::TaskStore;
use super::error::StorageResult;

/// Task lists kept in process memory.
///
/// `modify` runs under the DashMap shard write lock for the relay's entry.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<RelayId, Vec<RelayTask>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for MemoryTaskStore {
    fn load(&self, relay_id: &RelayId) -> StorageResult<Vec<RelayTask>> {
        Ok(self
            .tasks
            .get(relay_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    fn modify(
        &self,
        relay_id: &RelayId,
        apply: &mut dyn FnMut(&mut Vec<RelayTask>),
    ) -> StorageResult<()> {
        let mut entry = self.tasks.entry(relay_id.clone()).or_default();
        apply(entry.value_mut());
        Ok(())
    }
}
