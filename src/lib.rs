//! Authenticated API client for the loyalty and payments backend.
//!
//! DESIGN
//! ======
//! All business logic lives server-side; this crate owns only the session:
//! attaching bearer tokens, recovering from expiry with a single-flight
//! refresh, and tearing the session down when recovery is impossible.
//!
//! ```text
//! caller -> ApiClient --401--> RefreshCoordinator -> TokenStore
//!                                     |
//!                                     +--failure--> SessionTeardown -> SessionEvents
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod refresh;
pub mod session;
pub mod store;
pub mod tokens;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use auth::{AuthApi, Registration};
pub use client::{ApiClient, ApiRequest, ApiResponse, is_auth_route};
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use refresh::{RefreshCoordinator, RefreshError};
pub use session::{Session, SessionEvent, SessionEvents, SessionTeardown, SessionUser, SignOutReason};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use tokens::{TokenPair, TokenStore};
