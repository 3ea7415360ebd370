// ABOUTME: Cache server configuration: address, database index, and credentials.
// ABOUTME: Builds redis connection info and carries optional timeout overrides.

use crate::ssh::join_host_port;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_CACHE_PORT: u16 = 6379;

/// Configuration for the cache server.
#[derive(Clone, Deserialize)]
pub struct CacheConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Database index selected after connecting.
    #[serde(default)]
    pub db: i64,

    /// ACL username. Plain `AUTH <password>` is used when absent.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Overrides the client library's connect timeout. Ignored when tunneled.
    #[serde(default, with = "humantime_serde")]
    pub connection_timeout: Option<Duration>,

    /// Overrides the client library's response timeout. Ignored when tunneled.
    #[serde(default, with = "humantime_serde")]
    pub response_timeout: Option<Duration>,
}

fn default_port() -> u16 {
    DEFAULT_CACHE_PORT
}

impl CacheConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_CACHE_PORT,
            db: 0,
            username: None,
            password: None,
            connection_timeout: None,
            response_timeout: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                username: self.username.clone(),
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connection_timeout", &self.connection_timeout)
            .field("response_timeout", &self.response_timeout)
            .finish()
    }
}
