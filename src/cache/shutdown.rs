// ABOUTME: Outcome of closing a cache connection and its tunnel.
// ABOUTME: Teardown failures are kept as typed warnings instead of errors.

use crate::ssh;
use thiserror::Error;
use tokio::task::JoinError;

/// A teardown step that failed while closing a connection.
#[derive(Debug, Error)]
pub enum CloseWarning {
    #[error("cache connection driver for {address} panicked")]
    DriverPanicked {
        address: String,
        #[source]
        source: JoinError,
    },

    #[error("failed to disconnect the tunnel carrying {address}: {source}")]
    TunnelDisconnect {
        address: String,
        #[source]
        source: ssh::Error,
    },
}

/// Which teardown step a [`CloseWarning`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    CacheShutdown,
    TunnelDisconnect,
}

impl CloseWarning {
    pub fn kind(&self) -> WarningKind {
        match self {
            CloseWarning::DriverPanicked { .. } => WarningKind::CacheShutdown,
            CloseWarning::TunnelDisconnect { .. } => WarningKind::TunnelDisconnect,
        }
    }
}

/// What happened when a [`CacheConnection`](super::CacheConnection) was closed.
///
/// Both teardown steps always run. A step that fails is recorded here and
/// logged, never returned as an error.
#[derive(Debug)]
pub struct CloseReport {
    address: String,
    tunneled: bool,
    warnings: Vec<CloseWarning>,
}

impl CloseReport {
    pub(crate) fn new(address: String, tunneled: bool) -> Self {
        Self {
            address,
            tunneled,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, warning: CloseWarning) {
        tracing::warn!(address = %self.address, kind = ?warning.kind(), "{}", warning);
        self.warnings.push(warning);
    }

    /// Address of the cache server that was closed.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether a tunnel had to be torn down as well.
    pub fn was_tunneled(&self) -> bool {
        self.tunneled
    }

    pub fn warnings(&self) -> &[CloseWarning] {
        &self.warnings
    }

    /// True when every teardown step succeeded.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind() == kind)
    }
}
