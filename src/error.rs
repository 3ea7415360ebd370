// ABOUTME: Application-wide error types for kvtunnel.
// ABOUTME: Uses thiserror for ergonomic error handling.

use crate::cache::ConnectError;
use crate::ssh;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh::Error),

    #[error("cache command failed: {0}")]
    Command(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
