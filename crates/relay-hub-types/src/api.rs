//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};

use crate::{RelayId, RelayTask, ResultType, TaskId, TaskSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub spec: TaskSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    pub result_type: ResultType,
    #[serde(default)]
    pub result_payload: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<RelayTask>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRelayRequest {
    /// Pre-assigned id; a UUID is generated when absent.
    #[serde(default)]
    pub relay_id: Option<RelayId>,
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRelayResponse {
    pub relay_id: RelayId,
}

/// Error body returned for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}
