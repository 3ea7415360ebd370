// ABOUTME: Configuration file parsing for kvtunnel.yml.
// ABOUTME: A required cache section plus an optional SSH tunnel section.

use crate::cache::{CacheConfig, CacheConnection, ConnectError};
use crate::error::{Error, Result};
use crate::ssh::{self, TunnelConfig, TunnelSettings};
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILENAME: &str = "kvtunnel.yml";
pub const CONFIG_FILENAME_ALT: &str = "kvtunnel.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub cache: CacheConfig,

    /// Connect directly when absent.
    #[serde(default)]
    pub tunnel: Option<TunnelSettings>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [dir.join(CONFIG_FILENAME), dir.join(CONFIG_FILENAME_ALT)];

        for path in &candidates {
            if path.exists() {
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    /// Validate the tunnel section, if any.
    pub fn tunnel_config(&self) -> ssh::Result<Option<TunnelConfig>> {
        self.tunnel
            .clone()
            .map(TunnelConfig::try_from)
            .transpose()
    }

    /// Connect to the configured cache, through the tunnel when one is configured.
    pub async fn connect(&self) -> std::result::Result<CacheConnection, ConnectError> {
        let tunnel = self.tunnel_config()?;
        CacheConnection::connect(&self.cache, tunnel.as_ref()).await
    }
}
