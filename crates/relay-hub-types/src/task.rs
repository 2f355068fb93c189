//! Relay tasks and their state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TaskId;

/// Name of the single top-level directory inside a relay config archive.
pub const CONFIG_ARCHIVE_ROOT_FOLDER_NAME: &str = "config";

/// Lifecycle state of a task.
///
/// `Pending` is the only initial state; `Ok` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Ok,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Ok | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Ok => "OK",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Outcome reported by a relay when it finishes a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultType {
    Ok,
    Failed,
}

impl From<ResultType> for TaskStatus {
    fn from(result: ResultType) -> Self {
        match result {
            ResultType::Ok => TaskStatus::Ok,
            ResultType::Failed => TaskStatus::Failed,
        }
    }
}

/// What a task asks the relay to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskSpec {
    /// Install the configuration generation `serial`.
    ///
    /// `tar_data` is an uncompressed tar with a single root directory named
    /// [`CONFIG_ARCHIVE_ROOT_FOLDER_NAME`]. Base64 on the wire.
    RelayConfig {
        serial: u64,
        #[serde(with = "base64_bytes")]
        tar_data: Vec<u8>,
    },
    /// Ad-hoc fetch request forwarded from the site.
    FetchAdHoc { payload: String },
}

impl TaskSpec {
    /// The configuration serial, for config tasks.
    pub fn config_serial(&self) -> Option<u64> {
        match self {
            TaskSpec::RelayConfig { serial, .. } => Some(*serial),
            TaskSpec::FetchAdHoc { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TaskSpec::RelayConfig { .. } => "relay_config",
            TaskSpec::FetchAdHoc { .. } => "fetch_ad_hoc",
        }
    }
}

/// A unit of work queued for one relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTask {
    pub id: TaskId,
    pub spec: TaskSpec,
    pub status: TaskStatus,
    pub creation_timestamp: DateTime<Utc>,
    pub update_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_payload: Option<String>,
}

impl RelayTask {
    /// A fresh pending task with both timestamps set to `now`.
    pub fn pending(id: TaskId, spec: TaskSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            spec,
            status: TaskStatus::Pending,
            creation_timestamp: now,
            update_timestamp: now,
            result_payload: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// True for a pending config task targeting `serial`.
    pub fn is_pending_config_for(&self, serial: u64) -> bool {
        self.is_pending() && self.spec.config_serial() == Some(serial)
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
