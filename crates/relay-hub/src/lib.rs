//! relay-hub - versioned configuration publication and per-relay task queues.

// ============================================================================
// Always Available
// ============================================================================

pub mod auth;
pub mod config;
pub mod config_path;
pub mod edition;
pub mod factory;
pub mod relays;
pub mod store;
pub mod tasks;
pub mod transport;

pub use relay_hub_types as types;

// ============================================================================
// Server-only (behind `server` feature)
// ============================================================================

#[cfg(feature = "server")]
pub mod handlers;
#[cfg(feature = "server")]
pub mod server;
