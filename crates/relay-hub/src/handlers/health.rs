use axum::extract::State;
use axum::http::StatusCode;
use tracing::warn;

use crate::server::AppState;

pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Ready once the generation pointer can be read, published or not.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, &'static str) {
    let factory = state.factory.clone();
    match tokio::task::spawn_blocking(move || factory.retrieve_config_serial()).await {
        Ok(Ok(_)) => (StatusCode::OK, "ok"),
        Ok(Err(e)) => {
            warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
        Err(e) => {
            warn!(error = %e, "Readiness check panicked");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}
