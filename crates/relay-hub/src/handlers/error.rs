use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_hub_types::{ErrorBody, InvalidRelayId, RelayId};
use thiserror::Error;
use tracing::error;

use crate::auth::AuthError;
use crate::factory::FactoryError;
use crate::tasks::TaskError;

/// Every failure a handler can report. Rendered as `{"detail": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Factory(#[from] FactoryError),

    #[error(transparent)]
    InvalidRelayId(#[from] InvalidRelayId),

    #[error("Relay {0} not found")]
    RelayNotFound(RelayId),

    #[error("Relay {0} is already registered")]
    RelayExists(RelayId),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(_) => StatusCode::FORBIDDEN,
            ApiError::Task(e) | ApiError::Factory(FactoryError::Task(e)) => task_status(e),
            ApiError::InvalidRelayId(_) => StatusCode::BAD_REQUEST,
            ApiError::RelayNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RelayExists(_) => StatusCode::CONFLICT,
            ApiError::Factory(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn task_status(e: &TaskError) -> StatusCode {
    match e {
        TaskError::LimitReached { .. } => StatusCode::FORBIDDEN,
        TaskError::NotFound { .. } => StatusCode::NOT_FOUND,
        TaskError::AlreadyFinished { .. } => StatusCode::CONFLICT,
        TaskError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_hub_types::{TaskId, TaskStatus};

    #[test]
    fn status_mapping() {
        let relay = RelayId::new("relay-1").unwrap();
        let cases = [
            (
                ApiError::Task(TaskError::LimitReached { limit: 3 }),
                StatusCode::FORBIDDEN,
            ),
            (
                ApiError::Factory(FactoryError::Task(TaskError::LimitReached { limit: 3 })),
                StatusCode::FORBIDDEN,
            ),
            (
                ApiError::Auth(AuthError::NotLocalhost {
                    origin: "10.0.0.1".to_string(),
                }),
                StatusCode::FORBIDDEN,
            ),
            (
                ApiError::Task(TaskError::NotFound {
                    relay_id: relay.clone(),
                    task_id: TaskId::from("t"),
                }),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Task(TaskError::AlreadyFinished {
                    task_id: TaskId::from("t"),
                    status: TaskStatus::Ok,
                }),
                StatusCode::CONFLICT,
            ),
            (ApiError::RelayNotFound(relay), StatusCode::NOT_FOUND),
            (
                ApiError::InvalidRelayId(InvalidRelayId("..".to_string())),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::Internal("boom".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status(), expected, "{err}");
        }
    }

    #[test]
    fn limit_message_is_passed_through() {
        let err = ApiError::Task(TaskError::LimitReached { limit: 3 });
        assert_eq!(err.to_string(), "The maximum number of tasks 3 has been reached");
    }
}
