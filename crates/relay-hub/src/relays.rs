//! Known relays.
//!
//! Registration itself happens elsewhere on the site; the task subsystem
//! only reads the set of relay ids through [`RelaysRepository`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_hub_types::RelayId;
use tracing::info;

pub trait RelaysRepository: Send + Sync {
    /// All known relay ids, sorted.
    fn relay_ids(&self) -> Vec<RelayId>;
    fn contains(&self, relay_id: &RelayId) -> bool;
}

#[derive(Debug, Clone)]
pub struct RelayInfo {
    pub alias: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// In-memory relay registry, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct RelayRegistry {
    relays: Arc<DashMap<RelayId, RelayInfo>>,
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = RelayId>) -> Self {
        let registry = Self::new();
        for id in ids {
            registry.insert(id, None);
        }
        registry
    }

    /// Register a new relay under a freshly generated UUID.
    pub fn register(&self, alias: Option<String>) -> RelayId {
        loop {
            // A hyphenated UUID always passes RelayId validation.
            if let Ok(id) = RelayId::new(uuid::Uuid::new_v4().to_string())
                && self.insert(id.clone(), alias.clone())
            {
                return id;
            }
        }
    }

    /// Add `relay_id`; returns false if it was already known.
    pub fn insert(&self, relay_id: RelayId, alias: Option<String>) -> bool {
        let mut inserted = false;
        self.relays.entry(relay_id.clone()).or_insert_with(|| {
            inserted = true;
            RelayInfo {
                alias: alias.clone(),
                registered_at: Utc::now(),
            }
        });
        if inserted {
            info!(relay_id = %relay_id, alias = alias.as_deref().unwrap_or(""), "Registered relay");
        }
        inserted
    }

    pub fn get(&self, relay_id: &RelayId) -> Option<RelayInfo> {
        self.relays.get(relay_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }
}

impl RelaysRepository for RelayRegistry {
    fn relay_ids(&self) -> Vec<RelayId> {
        let mut ids: Vec<RelayId> = self.relays.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    fn contains(&self, relay_id: &RelayId) -> bool {
        self.relays.contains_key(relay_id)
    }
}
