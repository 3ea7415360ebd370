// ABOUTME: Tunnel configuration: endpoint, credential, timeout, and host key policy.
// ABOUTME: Converts loosely-typed file settings into a validated TunnelConfig.

use super::error::{Error, Result};
use super::host_key::HostKeyPolicy;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Timeout applied when none (or zero) is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEFAULT_PORT: u16 = 22;

/// How the tunnel authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    KeyFile,
    Password,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::KeyFile => write!(f, "key"),
            CredentialKind::Password => write!(f, "password"),
        }
    }
}

impl FromStr for CredentialKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "key" | "key-file" | "keyfile" => Ok(CredentialKind::KeyFile),
            "password" => Ok(CredentialKind::Password),
            _ => Err(Error::UnsupportedCredentialKind(s.to_string())),
        }
    }
}

/// Credential used to authenticate the tunnel.
#[derive(Clone)]
pub enum Credential {
    /// Private key read from disk, optionally encrypted.
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
    Password(String),
}

impl Credential {
    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Credential::KeyFile {
            path: path.into(),
            passphrase: None,
        }
    }

    pub fn encrypted_key_file(path: impl Into<PathBuf>, passphrase: impl Into<String>) -> Self {
        Credential::KeyFile {
            path: path.into(),
            passphrase: Some(passphrase.into()),
        }
    }

    pub fn password(password: impl Into<String>) -> Self {
        Credential::Password(password.into())
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Credential::KeyFile { .. } => CredentialKind::KeyFile,
            Credential::Password(_) => CredentialKind::Password,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credential::Password(_) => f.debug_tuple("Password").field(&"<redacted>").finish(),
        }
    }
}

/// Configuration for establishing an SSH tunnel.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Bastion host to connect to.
    pub host: String,
    /// SSH port (default: 22).
    pub port: u16,
    /// Username for authentication.
    pub user: String,
    pub credential: Credential,
    /// Bound on dial, handshake, and authentication. Zero means the default.
    pub timeout: Duration,
    pub host_key_policy: HostKeyPolicy,
    /// Optional path to known_hosts file.
    /// If None, uses the default ~/.ssh/known_hosts.
    pub known_hosts_path: Option<PathBuf>,
}

impl TunnelConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>, credential: Credential) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            credential,
            timeout: DEFAULT_TIMEOUT,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }

    pub fn address(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// Tunnel section as written in a configuration file.
///
/// The credential kind is kept as a string so that an unknown kind surfaces
/// as a configuration error at conversion time rather than as a parse error.
#[derive(Clone, Deserialize)]
pub struct TunnelSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub auth: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    #[serde(default)]
    pub known_hosts: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl fmt::Debug for TunnelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("auth", &self.auth)
            .field("key_file", &self.key_file)
            .field("timeout", &self.timeout)
            .field("host_key_policy", &self.host_key_policy)
            .field("known_hosts", &self.known_hosts)
            .finish_non_exhaustive()
    }
}

impl TryFrom<TunnelSettings> for TunnelConfig {
    type Error = Error;

    fn try_from(settings: TunnelSettings) -> Result<Self> {
        let kind: CredentialKind = settings.auth.parse()?;
        let credential = match kind {
            CredentialKind::KeyFile => {
                let path = settings.key_file.ok_or(Error::MissingCredential {
                    kind,
                    field: "key_file",
                })?;
                Credential::KeyFile {
                    path: expand_home(&path),
                    passphrase: settings.passphrase,
                }
            }
            CredentialKind::Password => {
                let password = settings.password.ok_or(Error::MissingCredential {
                    kind,
                    field: "password",
                })?;
                Credential::Password(password)
            }
        };

        Ok(TunnelConfig {
            host: settings.host,
            port: settings.port,
            user: settings.user,
            credential,
            timeout: settings.timeout,
            host_key_policy: settings.host_key_policy,
            known_hosts_path: settings.known_hosts.as_deref().map(expand_home),
        })
    }
}

/// Expand a leading `~/` using `HOME`. Other paths are returned unchanged.
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

/// Format `host:port`, bracketing IPv6 literals.
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
