// ABOUTME: Transport selection and per-operation timeouts for cache connections.
// ABOUTME: Tunneled transports run with timeouts disabled.

use super::config::CacheConfig;
use redis::AsyncConnectionConfig;
use std::time::Duration;

/// How bytes reach the cache server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Plain TCP socket opened by the client library.
    Direct,
    /// Stream supplied by the caller, usually an SSH channel.
    Tunneled,
}

/// Connect and response timeouts applied to a cache connection.
/// `None` leaves the corresponding deadline unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeouts {
    pub connection: Option<Duration>,
    pub response: Option<Duration>,
}

impl Timeouts {
    /// Timeouts for `config` on the given transport.
    ///
    /// SSH channel streams have no per-operation deadlines, so tunneled
    /// connections ignore whatever `config` asks for.
    pub fn for_transport(config: &CacheConfig, transport: Transport) -> Self {
        match transport {
            Transport::Direct => Self {
                connection: config.connection_timeout,
                response: config.response_timeout,
            },
            Transport::Tunneled => Self::disabled(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_disabled(&self) -> bool {
        self.connection.is_none() && self.response.is_none()
    }

    pub(crate) fn to_async_config(self) -> AsyncConnectionConfig {
        let mut config = AsyncConnectionConfig::new();
        if let Some(timeout) = self.connection {
            config = config.set_connection_timeout(timeout);
        }
        if let Some(timeout) = self.response {
            config = config.set_response_timeout(timeout);
        }
        config
    }
}
