// ABOUTME: SSH tunnel module for reaching hosts behind a bastion.
// ABOUTME: Supports password and key-file authentication with configurable host key checks.

mod client;
mod config;
mod error;
mod forward;
mod host_key;

pub use client::{Tunnel, TunnelIo, TunnelStream};
pub use config::{
    Credential, CredentialKind, DEFAULT_PORT, DEFAULT_TIMEOUT, TunnelConfig, TunnelSettings,
};
pub use error::{Error, ErrorKind, Result};
pub use host_key::HostKeyPolicy;

pub(crate) use config::join_host_port;
