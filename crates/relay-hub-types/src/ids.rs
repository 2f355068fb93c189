//! Relay and task identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_RELAY_ID_LEN: usize = 128;

/// Identity of a relay, typically a UUID string.
///
/// Relay ids end up as directory and file names on the site, so only a
/// conservative character set is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelayId(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid relay id: {0:?}")]
pub struct InvalidRelayId(pub String);

impl RelayId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidRelayId> {
        let id = id.into();
        if is_valid_relay_id(&id) {
            Ok(Self(id))
        } else {
            Err(InvalidRelayId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_relay_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_RELAY_ID_LEN
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl TryFrom<String> for RelayId {
    type Error = InvalidRelayId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RelayId> for String {
    fn from(id: RelayId) -> Self {
        id.0
    }
}

impl FromStr for RelayId {
    type Err = InvalidRelayId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for RelayId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a single task. Unique and stable for the task's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
