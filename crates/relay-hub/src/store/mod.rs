//! Storage backends.
//!
//! - [`ObjectStore`]: one document per file, locked read-modify-write,
//!   atomic replace on write. Backs the serial counter and the file task store.
//! - [`TaskStore`]: per-relay task lists, in memory or on disk.

use relay_hub_types::{RelayId, RelayTask};

mod error;
mod file;
mod lock;
mod memory;
mod object;

pub use error::{StorageError, StorageResult};
pub use file::FileTaskStore;
pub use lock::FileLock;
pub use memory::MemoryTaskStore;
pub use object::{JsonFormat, LockedObject, ObjectFormat, ObjectStore, SerialFormat, atomic_write_file};

/// Backing storage for per-relay task lists.
///
/// `modify` must give `apply` exclusive access to the relay's list for the
/// duration of the call, so check-then-insert sequences inside `apply` are
/// atomic with respect to every other caller of the same store.
pub trait TaskStore: Send + Sync {
    /// All tasks recorded for `relay_id`; empty when the relay has none.
    fn load(&self, relay_id: &RelayId) -> StorageResult<Vec<RelayTask>>;

    /// Run `apply` on the relay's task list under exclusive access and persist the result.
    fn modify(
        &self,
        relay_id: &RelayId,
        apply: &mut dyn FnMut(&mut Vec<RelayTask>),
    ) -> StorageResult<()>;
}
