use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::auth::AuthorizationGate;
use crate::config::{Config, TaskStorage};
use crate::config_path::ConfigPathStore;
use crate::factory::ConfigTaskFactory;
use crate::handlers;
use crate::relays::RelayRegistry;
use crate::store::{FileTaskStore, MemoryTaskStore, TaskStore};
use crate::tasks::TasksRepository;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub tasks: TasksRepository,
    pub relays: RelayRegistry,
    pub factory: Arc<ConfigTaskFactory>,
    pub gate: AuthorizationGate,
}

impl AppState {
    pub fn new(
        config_paths: ConfigPathStore,
        relays: RelayRegistry,
        tasks: TasksRepository,
        config: &Config,
    ) -> Self {
        let factory = ConfigTaskFactory::new(
            config_paths,
            Arc::new(relays.clone()),
            tasks.clone(),
            config.site.edition,
        );
        Self {
            tasks,
            relays,
            factory: Arc::new(factory),
            gate: AuthorizationGate::new(config.site.site_cn.as_str()),
        }
    }

    /// Wire up repositories as described by `config`.
    pub fn from_config(config: &Config) -> Self {
        let lock_timeout = config.activation.lock_timeout();
        let config_paths =
            ConfigPathStore::new(&config.site.omd_root).with_lock_timeout(lock_timeout);

        let store: Arc<dyn TaskStore> = match config.tasks.storage {
            TaskStorage::Memory => Arc::new(MemoryTaskStore::new()),
            TaskStorage::File => {
                Arc::new(FileTaskStore::new(&config.tasks.path).with_lock_timeout(lock_timeout))
            }
        };
        let tasks = TasksRepository::new(store, config.tasks.settings());
        let relays = RelayRegistry::from_ids(config.relays.iter().cloned());

        Self::new(config_paths, relays, tasks, config)
    }
}

pub fn build_app(state: AppState, request_timeout_secs: u64) -> Router {
    let api_v1 = Router::new()
        .route("/relays", post(handlers::v1::register_relay))
        .route("/relays/config-tasks", post(handlers::v1::create_config_tasks))
        .route(
            "/relays/{relay_id}/config-tasks",
            post(handlers::v1::create_config_task),
        )
        .route(
            "/relays/{relay_id}/tasks",
            get(handlers::v1::list_tasks).post(handlers::v1::create_task),
        )
        .route(
            "/relays/{relay_id}/tasks/{task_id}",
            get(handlers::v1::get_task).patch(handlers::v1::update_task),
        );

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .nest("/api/v1", api_v1)
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_secs),
        ))
}

/// Queue the current configuration for all relays once at startup.
///
/// Failures are logged; the server starts regardless.
pub async fn create_startup_config_tasks(state: &AppState) {
    let factory = state.factory.clone();
    if !factory.edition().supports_relay_config() {
        info!(edition = %factory.edition(), "Skipping startup config tasks");
        return;
    }

    match tokio::task::spawn_blocking(move || factory.create_for_all_relays()).await {
        Ok(Ok(created)) => info!(created = created.len(), "Startup config tasks done"),
        Ok(Err(e)) => warn!(error = %e, "Failed to create startup config tasks"),
        Err(e) => warn!(error = %e, "Startup config task worker failed"),
    }
}
