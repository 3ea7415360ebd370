// ABOUTME: Connection error types with SNAFU pattern.
// ABOUTME: Records which stage of tunnel or cache setup failed.

use crate::ssh;
use redis::RedisError;
use snafu::Snafu;

/// Failure while building a cache connection.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConnectError {
    #[snafu(display("tunnel establishment failed: {source}"))]
    Tunnel { source: ssh::Error },

    #[snafu(display("failed to reach {address} through the tunnel: {source}"))]
    TunnelDial { address: String, source: ssh::Error },

    #[snafu(display("could not reach cache server {address}: {source}"))]
    Dial {
        address: String,
        source: std::io::Error,
    },

    #[snafu(display("cache connection to {address} failed: {source}"))]
    Connect { address: String, source: RedisError },

    #[snafu(display("liveness probe against {address} failed: {source}"))]
    Probe { address: String, source: RedisError },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    /// Invalid settings, detected before any I/O.
    Configuration,
    /// Private key file unreadable or unparsable.
    CredentialMaterial,
    /// SSH dial, handshake, host key, or authentication failure.
    TunnelEstablishment,
    /// The cache server could not be reached or did not answer the probe.
    CacheConnection,
}

impl ConnectError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ConnectErrorKind {
        match self {
            ConnectError::Tunnel { source } => match source.kind() {
                ssh::ErrorKind::Configuration => ConnectErrorKind::Configuration,
                ssh::ErrorKind::CredentialMaterial => ConnectErrorKind::CredentialMaterial,
                ssh::ErrorKind::Connection => ConnectErrorKind::TunnelEstablishment,
            },
            ConnectError::TunnelDial { .. }
            | ConnectError::Dial { .. }
            | ConnectError::Connect { .. }
            | ConnectError::Probe { .. } => ConnectErrorKind::CacheConnection,
        }
    }
}

impl From<ssh::Error> for ConnectError {
    fn from(source: ssh::Error) -> Self {
        ConnectError::Tunnel { source }
    }
}
