//! V1 API handlers.

mod relays;
mod tasks;

pub use relays::{create_config_task, create_config_tasks, register_relay};
pub use tasks::{create_task, get_task, list_tasks, update_task};

use relay_hub_types::RelayId;

use super::ApiError;
use crate::relays::RelaysRepository;
use crate::server::AppState;

/// Run filesystem-bound repository work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
}

fn ensure_known(state: &AppState, relay_id: &RelayId) -> Result<(), ApiError> {
    if !state.relays.contains(relay_id) {
        return Err(ApiError::RelayNotFound(relay_id.clone()));
    }
    Ok(())
}
