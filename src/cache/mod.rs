// ABOUTME: Cache connection module for Redis-compatible servers.
// ABOUTME: Connects directly or through an SSH tunnel and verifies liveness.

mod config;
mod connection;
mod error;
mod shutdown;
mod transport;

pub use config::{CacheConfig, DEFAULT_CACHE_PORT};
pub use connection::CacheConnection;
pub use error::{ConnectError, ConnectErrorKind};
pub use shutdown::{CloseReport, CloseWarning, WarningKind};
pub use transport::{Timeouts, Transport};
