//! Per-relay task queue handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use relay_hub_types::{
    CreateTaskRequest, CreateTaskResponse, RelayId, RelayTask, TaskId, TaskListResponse, TaskStatus,
    UpdateTaskRequest,
};
use serde::Deserialize;
use tracing::debug;

use super::{blocking, ensure_known};
use crate::handlers::{ApiError, Caller};
use crate::server::AppState;
use crate::tasks::new_task_id;

#[derive(Debug, Deserialize)]
pub struct ListTasksParams {
    /// Only return tasks in this status.
    status: Option<TaskStatus>,
}

/// POST /api/v1/relays/{relay_id}/tasks
pub async fn create_task(
    State(state): State<AppState>,
    caller: Caller,
    Path(relay_id): Path<String>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, ApiError> {
    state.gate.authorize_site(caller.origin, caller.cn())?;
    let relay_id = RelayId::new(relay_id)?;
    ensure_known(&state, &relay_id)?;
    debug!(relay_id = %relay_id, kind = req.spec.kind(), "creating task");

    let task = RelayTask::pending(new_task_id(), req.spec, Utc::now());
    let task_id = task.id.clone();
    let tasks = state.tasks.clone();
    blocking(move || Ok(tasks.store_task(&relay_id, task)?)).await?;

    Ok(Json(CreateTaskResponse { task_id }))
}

/// GET /api/v1/relays/{relay_id}/tasks
///
/// Query params:
/// - ?status=PENDING - filter by status
pub async fn list_tasks(
    State(state): State<AppState>,
    caller: Caller,
    Path(relay_id): Path<String>,
    Query(params): Query<ListTasksParams>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let relay_id = RelayId::new(relay_id)?;
    state
        .gate
        .authorize_relay(caller.origin, caller.cn(), &relay_id)?;
    ensure_known(&state, &relay_id)?;

    let tasks = state.tasks.clone();
    let tasks = blocking(move || {
        Ok(match params.status {
            Some(status) => tasks.get_tasks_with_status(&relay_id, status)?,
            None => tasks.get_tasks(&relay_id)?,
        })
    })
    .await?;
    Ok(Json(TaskListResponse { tasks }))
}

/// GET /api/v1/relays/{relay_id}/tasks/{task_id}
pub async fn get_task(
    State(state): State<AppState>,
    caller: Caller,
    Path((relay_id, task_id)): Path<(String, TaskId)>,
) -> Result<Json<RelayTask>, ApiError> {
    let relay_id = RelayId::new(relay_id)?;
    state
        .gate
        .authorize_relay(caller.origin, caller.cn(), &relay_id)?;
    ensure_known(&state, &relay_id)?;

    let tasks = state.tasks.clone();
    let task = blocking(move || Ok(tasks.get_task(&relay_id, &task_id)?)).await?;
    Ok(Json(task))
}

/// PATCH /api/v1/relays/{relay_id}/tasks/{task_id}
pub async fn update_task(
    State(state): State<AppState>,
    caller: Caller,
    Path((relay_id, task_id)): Path<(String, TaskId)>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<RelayTask>, ApiError> {
    let relay_id = RelayId::new(relay_id)?;
    state
        .gate
        .authorize_relay(caller.origin, caller.cn(), &relay_id)?;
    ensure_known(&state, &relay_id)?;

    let tasks = state.tasks.clone();
    let task = blocking(move || {
        Ok(tasks.update_task(&relay_id, &task_id, req.result_type, req.result_payload)?)
    })
    .await?;
    Ok(Json(task))
}
