//! Relay registration and config task distribution.

use axum::Json;
use axum::extract::{Path, State};
use relay_hub_types::{
    RegisterRelayRequest, RegisterRelayResponse, RelayId, RelayTask, TaskListResponse,
};
use tracing::debug;

use super::{blocking, ensure_known};
use crate::handlers::{ApiError, Caller};
use crate::server::AppState;

/// POST /api/v1/relays
pub async fn register_relay(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<RegisterRelayRequest>,
) -> Result<Json<RegisterRelayResponse>, ApiError> {
    state.gate.authorize_site(caller.origin, caller.cn())?;

    let relay_id = match req.relay_id {
        Some(relay_id) => {
            if !state.relays.insert(relay_id.clone(), req.alias) {
                return Err(ApiError::RelayExists(relay_id));
            }
            relay_id
        }
        None => state.relays.register(req.alias),
    };

    Ok(Json(RegisterRelayResponse { relay_id }))
}

/// POST /api/v1/relays/config-tasks
///
/// Queue the current configuration generation for every known relay.
pub async fn create_config_tasks(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<TaskListResponse>, ApiError> {
    state.gate.authorize_site(caller.origin, caller.cn())?;

    let factory = state.factory.clone();
    let tasks = blocking(move || Ok(factory.create_for_all_relays()?)).await?;
    Ok(Json(TaskListResponse { tasks }))
}

/// POST /api/v1/relays/{relay_id}/config-tasks
///
/// Responds with the new task, or `null` when nothing had to be queued.
pub async fn create_config_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(relay_id): Path<String>,
) -> Result<Json<Option<RelayTask>>, ApiError> {
    state.gate.authorize_site(caller.origin, caller.cn())?;
    let relay_id = RelayId::new(relay_id)?;
    ensure_known(&state, &relay_id)?;
    debug!(relay_id = %relay_id, "creating config task");

    let factory = state.factory.clone();
    let task = blocking(move || Ok(factory.create_for_relay(&relay_id)?)).await?;
    Ok(Json(task))
}
