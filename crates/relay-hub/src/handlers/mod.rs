//! HTTP request handlers.

mod error;
mod extract;
mod health;
pub mod v1;
mod version;

pub use error::ApiError;
pub use extract::Caller;
pub use health::{livez, readyz};
pub use version::version;
