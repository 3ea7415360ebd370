// ABOUTME: SSH tunnel session management using russh.
// ABOUTME: Handles credential loading, connection, authentication, and stream dialing.

use super::config::{Credential, TunnelConfig, join_host_port};
use super::error::{Error, Result};
use super::forward::{self, ForwardHandle};
use super::host_key::HostKeyVerifier;
use parking_lot::Mutex;
use russh::Disconnect;
use russh::client::{self, Config, Handle};
use russh::keys::{PrivateKeyWithHashAlg, decode_secret_key, ssh_key};
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Interval for SSH keepalives on an otherwise idle tunnel.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Byte stream carried over a tunnel channel.
pub trait TunnelIo: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> TunnelIo for T {}

/// A TCP stream opened through the tunnel.
pub type TunnelStream = Pin<Box<dyn TunnelIo>>;

/// Authentication method resolved from the credential.
enum AuthMethod {
    Password(String),
    KeyFile(Arc<ssh_key::PrivateKey>),
}

/// An authenticated SSH session able to dial TCP streams from the remote host.
pub struct Tunnel {
    host: String,
    port: u16,
    user: String,
    handle: Arc<Handle<HostKeyVerifier>>,
    /// Active local port forwarders.
    forwarders: Mutex<Vec<ForwardHandle>>,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

impl Tunnel {
    /// Connect and authenticate to the bastion host.
    ///
    /// Key material is read and parsed before any network activity. Dial,
    /// handshake, and authentication together are bounded by the configured
    /// timeout.
    pub async fn connect(config: &TunnelConfig) -> Result<Self> {
        let auth_method = load_credential(&config.credential).await?;
        let timeout = config.effective_timeout();

        tracing::debug!(
            host = %config.host,
            port = config.port,
            user = %config.user,
            credential = %config.credential.kind(),
            "connecting SSH tunnel"
        );

        let handle = tokio::time::timeout(timeout, establish(config, auth_method))
            .await
            .map_err(|_| Error::Timeout(timeout))??;

        tracing::info!(address = %config.address(), user = %config.user, "SSH tunnel established");

        Ok(Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            handle: Arc::new(handle),
            forwarders: Mutex::new(Vec::new()),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// True once the SSH session has ended, whether by `disconnect` or by the server.
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// Open a TCP stream to `host:port` as seen from the remote host.
    pub async fn dial(&self, host: &str, port: u16) -> Result<TunnelStream> {
        open_stream(&self.handle, host, port, None).await
    }

    /// Forward a local TCP port to `host:port` through the tunnel.
    ///
    /// Binds `bind` (port 0 picks a free port) and returns the bound address.
    /// The forwarder runs until the tunnel is disconnected.
    pub async fn forward_local(&self, bind: SocketAddr, host: &str, port: u16) -> Result<SocketAddr> {
        let forward_handle =
            forward::start_forward(Arc::clone(&self.handle), bind, host.to_string(), port).await?;
        let local_addr = forward_handle.local_addr();
        self.forwarders.lock().push(forward_handle);
        Ok(local_addr)
    }

    /// Disconnect the session.
    pub async fn disconnect(self) -> Result<()> {
        // Drain to Vec to release lock before await
        let forwarders: Vec<_> = self.forwarders.lock().drain(..).collect();
        for forwarder in forwarders {
            forwarder.stop().await;
        }

        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        tracing::debug!(host = %self.host, port = self.port, "SSH tunnel disconnected");
        Ok(())
    }
}

/// Open a direct-tcpip channel and expose it as a byte stream.
pub(crate) async fn open_stream(
    handle: &Handle<HostKeyVerifier>,
    host: &str,
    port: u16,
    originator: Option<SocketAddr>,
) -> Result<TunnelStream> {
    let (originator_address, originator_port) = originator
        .map(|addr| (addr.ip().to_string(), u32::from(addr.port())))
        .unwrap_or_else(|| ("127.0.0.1".to_string(), 0));

    let channel = handle
        .channel_open_direct_tcpip(host, u32::from(port), originator_address, originator_port)
        .await
        .map_err(|e| Error::ChannelOpen {
            target: join_host_port(host, port),
            reason: e.to_string(),
        })?;

    tracing::debug!(target = %join_host_port(host, port), "opened tunnel channel");
    Ok(Box::pin(channel.into_stream()))
}

async fn establish(
    config: &TunnelConfig,
    auth_method: AuthMethod,
) -> Result<Handle<HostKeyVerifier>> {
    let russh_config = Config {
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        ..Default::default()
    };

    let verifier = HostKeyVerifier::new(
        config.host.clone(),
        config.port,
        config.host_key_policy,
        config.known_hosts_path.clone(),
    );

    let mut session = client::connect(
        Arc::new(russh_config),
        (config.host.as_str(), config.port),
        verifier,
    )
    .await
    .map_err(|e| match e {
        russh::Error::UnknownKey => Error::HostKeyRejected {
            host: config.address(),
        },
        russh::Error::IO(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            Error::Connection(format!("connection refused to {}", config.address()))
        }
        e => Error::Connection(e.to_string()),
    })?;

    if !authenticate(&mut session, &config.user, auth_method).await? {
        return Err(Error::AuthenticationFailed {
            user: config.user.clone(),
        });
    }

    Ok(session)
}

async fn authenticate(
    session: &mut Handle<HostKeyVerifier>,
    user: &str,
    auth_method: AuthMethod,
) -> Result<bool> {
    let result = match auth_method {
        AuthMethod::Password(password) => session.authenticate_password(user, password).await?,
        AuthMethod::KeyFile(key) => {
            let hash_alg = session.best_supported_rsa_hash().await?.flatten();
            session
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                .await?
        }
    };

    Ok(result.success())
}

async fn load_credential(credential: &Credential) -> Result<AuthMethod> {
    match credential {
        Credential::Password(password) => Ok(AuthMethod::Password(password.clone())),
        Credential::KeyFile { path, passphrase } => {
            let contents = tokio::fs::read(path).await.map_err(|source| Error::KeyRead {
                path: path.clone(),
                source,
            })?;
            let key = parse_private_key(path, &contents, passphrase.as_deref())?;
            Ok(AuthMethod::KeyFile(Arc::new(key)))
        }
    }
}

fn parse_private_key(
    path: &Path,
    contents: &[u8],
    passphrase: Option<&str>,
) -> Result<ssh_key::PrivateKey> {
    let text = std::str::from_utf8(contents).map_err(|_| Error::MalformedKey {
        path: path.to_path_buf(),
        reason: "key file is not valid UTF-8".to_string(),
    })?;

    decode_secret_key(text, passphrase).map_err(|e| Error::MalformedKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
