//! Shared types for relay-hub: identifiers, tasks and HTTP bodies.
//!
//! These are the types a relay sees on the wire, so they carry no server
//! logic beyond construction and state checks.

mod api;
mod ids;
mod task;

pub use api::{
    CreateTaskRequest, CreateTaskResponse, ErrorBody, RegisterRelayRequest, RegisterRelayResponse,
    TaskListResponse, UpdateTaskRequest,
};
pub use ids::{InvalidRelayId, RelayId, TaskId};
pub use task::{CONFIG_ARCHIVE_ROOT_FOLDER_NAME, RelayTask, ResultType, TaskSpec, TaskStatus};
