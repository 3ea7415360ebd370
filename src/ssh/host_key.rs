// ABOUTME: Server host key verification for tunnel sessions.
// ABOUTME: Strict known_hosts checking, trust-on-first-use, or explicit opt-out.

use russh::client;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::ssh_key;
use serde::Deserialize;
use std::path::PathBuf;

/// How the tunnel decides whether to trust the server's host key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// The key must already be present in known_hosts.
    #[default]
    Strict,
    /// Unknown hosts are accepted and recorded; changed keys are rejected.
    TrustFirstUse,
    /// Any key is accepted. Insecure, opt-in only.
    AcceptAny,
}

/// russh client handler that applies a [`HostKeyPolicy`].
pub(crate) struct HostKeyVerifier {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts_path: Option<PathBuf>,
}

impl HostKeyVerifier {
    pub(crate) fn new(
        host: String,
        port: u16,
        policy: HostKeyPolicy,
        known_hosts_path: Option<PathBuf>,
    ) -> Self {
        Self {
            host,
            port,
            policy,
            known_hosts_path,
        }
    }

    fn learn(&self, server_public_key: &ssh_key::PublicKey) {
        let learn_result = match &self.known_hosts_path {
            Some(path) => learn_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => learn_known_hosts(&self.host, self.port, server_public_key),
        };
        if let Err(e) = learn_result {
            tracing::warn!("Failed to save host key to known_hosts: {}", e);
        }
    }
}

impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        if self.policy == HostKeyPolicy::AcceptAny {
            tracing::warn!(
                "Host key verification disabled: accepting key for {}:{}",
                self.host,
                self.port
            );
            return Ok(true);
        }

        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) if self.policy == HostKeyPolicy::TrustFirstUse => {
                tracing::warn!(
                    "Trust-On-First-Use: accepting unknown host key for {}:{}",
                    self.host,
                    self.port
                );
                self.learn(server_public_key);
                Ok(true)
            }
            Ok(false) => {
                tracing::warn!("Host {}:{} not found in known_hosts", self.host, self.port);
                Ok(false)
            }
            Err(russh::keys::Error::KeyChanged { .. }) => {
                tracing::error!("Host key for {}:{} has changed", self.host, self.port);
                Ok(false)
            }
            // Unreadable known_hosts: only trust-on-first-use may proceed.
            Err(e) => {
                tracing::debug!("known_hosts check failed: {}", e);
                if self.policy == HostKeyPolicy::TrustFirstUse {
                    self.learn(server_public_key);
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }
}
