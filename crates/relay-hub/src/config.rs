use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_hub_types::RelayId;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use crate::edition::Edition;
use crate::tasks::{DEFAULT_FINISHED_TASK_TTL, DEFAULT_MAX_NUMBER_OF_TASKS, TasksSettings};

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub activation: ActivationConfig,
    /// Relays known at startup.
    #[serde(default)]
    pub relays: Vec<RelayId>,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Additionally serve the API on this Unix socket.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            socket_path: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8085
}

fn default_request_timeout() -> u64 {
    30
}

// ============================================================================
// SiteConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SiteConfig {
    /// Site root; generations live below `var/check_mk/core/helper_config`.
    #[serde(default = "default_omd_root")]
    pub omd_root: PathBuf,
    /// CN of the site's own client certificate. Empty rejects all site requests.
    #[serde(default)]
    pub site_cn: String,
    #[serde(default)]
    pub edition: Edition,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            omd_root: default_omd_root(),
            site_cn: String::new(),
            edition: Edition::default(),
        }
    }
}

fn default_omd_root() -> PathBuf {
    PathBuf::from(".")
}

// ============================================================================
// TasksConfig
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStorage {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_max_number_of_tasks")]
    pub max_number_of_tasks: usize,
    #[serde(default = "default_finished_task_ttl")]
    pub finished_task_ttl_seconds: u64,
    #[serde(default)]
    pub storage: TaskStorage,
    /// Directory for `storage: file`.
    #[serde(default = "default_tasks_path")]
    pub path: PathBuf,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            max_number_of_tasks: default_max_number_of_tasks(),
            finished_task_ttl_seconds: default_finished_task_ttl(),
            storage: TaskStorage::default(),
            path: default_tasks_path(),
        }
    }
}

impl TasksConfig {
    pub fn settings(&self) -> TasksSettings {
        TasksSettings {
            max_number_of_tasks: self.max_number_of_tasks,
            finished_task_ttl: Duration::from_secs(self.finished_task_ttl_seconds),
        }
    }
}

fn default_max_number_of_tasks() -> usize {
    DEFAULT_MAX_NUMBER_OF_TASKS
}

fn default_finished_task_ttl() -> u64 {
    DEFAULT_FINISHED_TASK_TTL.as_secs()
}

fn default_tasks_path() -> PathBuf {
    PathBuf::from(".relay-hub/tasks")
}

// ============================================================================
// ActivationConfig
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ActivationConfig {
    /// Upper bound on waiting for the activation lock. Unset waits forever.
    #[serde(default)]
    pub lock_timeout_seconds: Option<u64>,
}

impl ActivationConfig {
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_seconds.map(Duration::from_secs)
    }
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================
