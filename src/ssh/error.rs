// ABOUTME: SSH tunnel error types.
// ABOUTME: Separates configuration, credential material, and connection failures.

use super::config::CredentialKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported credential kind {0:?} (expected \"key\" or \"password\")")]
    UnsupportedCredentialKind(String),

    #[error("credential kind {kind} requires `{field}`")]
    MissingCredential {
        kind: CredentialKind,
        field: &'static str,
    },

    #[error("failed to read key file {path}: {source}")]
    KeyRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed private key in {path}: {reason}")]
    MalformedKey { path: PathBuf, reason: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("host key for {host} was rejected")]
    HostKeyRejected { host: String },

    #[error("SSH connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication failed for user {user}")]
    AuthenticationFailed { user: String },

    #[error("failed to open channel to {target}: {reason}")]
    ChannelOpen { target: String, reason: String },

    #[error("port forwarding failed: {0}")]
    ForwardFailed(String),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),
}

/// Stage an SSH error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any I/O.
    Configuration,
    /// The private key could not be read or parsed.
    CredentialMaterial,
    /// Dial, handshake, authentication, or channel failure.
    Connection,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedCredentialKind(_) | Error::MissingCredential { .. } => {
                ErrorKind::Configuration
            }
            Error::KeyRead { .. } | Error::MalformedKey { .. } => ErrorKind::CredentialMaterial,
            Error::Connection(_)
            | Error::HostKeyRejected { .. }
            | Error::Timeout(_)
            | Error::AuthenticationFailed { .. }
            | Error::ChannelOpen { .. }
            | Error::ForwardFailed(_)
            | Error::Protocol(_) => ErrorKind::Connection,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
