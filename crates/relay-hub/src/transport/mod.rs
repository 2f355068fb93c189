//! Listeners relays connect to.
//!
//! - [`socket`]: raw Unix-socket listener with a bounded accept wait.
//! - [`http`]: the HTTP API served over TCP or a Unix socket.

#[cfg(feature = "server")]
pub mod http;
pub mod socket;

#[cfg(feature = "server")]
pub use http::{LocalSocket, serve_tcp, serve_unix};
pub use socket::{Received, SocketListener};
