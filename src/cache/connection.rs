// ABOUTME: Cache connection factory and the combined cache-plus-tunnel handle.
// ABOUTME: Wires the client to TCP or a tunnel stream, probes liveness, and closes both together.

use super::config::CacheConfig;
use super::error::{ConnectError, ConnectSnafu, DialSnafu};
use super::shutdown::{CloseReport, CloseWarning};
use super::transport::{Timeouts, Transport};
use crate::ssh::{Tunnel, TunnelConfig};
use redis::RedisResult;
use redis::aio::MultiplexedConnection;
use snafu::ResultExt;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

/// A live cache connection, optionally carried by an SSH tunnel.
///
/// Owns the client, the task driving its transport, and the tunnel.
/// [`CacheConnection::close`] releases all of them.
pub struct CacheConnection {
    address: String,
    connection: MultiplexedConnection,
    /// Reads replies off the transport; aborting it ends every client clone.
    driver: JoinHandle<()>,
    tunnel: Option<Tunnel>,
}

impl std::fmt::Debug for CacheConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheConnection")
            .field("address", &self.address)
            .field("tunnel", &self.tunnel)
            .finish_non_exhaustive()
    }
}

impl CacheConnection {
    /// Connect to the cache server, through an SSH tunnel when `tunnel` is set.
    ///
    /// Returns only after the server answered a liveness probe. On any
    /// failure, whatever was opened along the way is released first.
    pub async fn connect(
        cache: &CacheConfig,
        tunnel: Option<&TunnelConfig>,
    ) -> Result<Self, ConnectError> {
        match tunnel {
            Some(tunnel_config) => {
                let tunnel = Tunnel::connect(tunnel_config).await?;
                Self::connect_through(cache, tunnel).await
            }
            None => Self::connect_direct(cache).await,
        }
    }

    /// Connect over an already established tunnel, taking ownership of it.
    pub async fn connect_through(cache: &CacheConfig, tunnel: Tunnel) -> Result<Self, ConnectError> {
        let stream = match tunnel.dial(&cache.host, cache.port).await {
            Ok(stream) => stream,
            Err(source) => {
                release_tunnel(tunnel).await;
                return Err(ConnectError::TunnelDial {
                    address: cache.address(),
                    source,
                });
            }
        };

        match Self::over_stream(cache, stream).await {
            Ok(mut connection) => {
                connection.tunnel = Some(tunnel);
                Ok(connection)
            }
            Err(e) => {
                release_tunnel(tunnel).await;
                Err(e)
            }
        }
    }

    /// Speak the cache protocol over `stream` instead of a socket of our own.
    ///
    /// Per-operation timeouts are disabled on this path.
    pub async fn over_stream<S>(cache: &CacheConfig, stream: S) -> Result<Self, ConnectError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let timeouts = Timeouts::for_transport(cache, Transport::Tunneled);
        let connection = Self::handshake(cache, stream, timeouts).await?;
        tracing::debug!(address = %connection.address, db = cache.db, "cache connection established over stream");
        Ok(connection)
    }

    async fn connect_direct(cache: &CacheConfig) -> Result<Self, ConnectError> {
        let address = cache.address();
        let timeouts = Timeouts::for_transport(cache, Transport::Direct);

        let dial = TcpStream::connect((cache.host.as_str(), cache.port));
        let stream = match timeouts.connection {
            Some(limit) => tokio::time::timeout(limit, dial)
                .await
                .unwrap_or_else(|_| {
                    Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no connection within {:?}", limit),
                    ))
                }),
            None => dial.await,
        }
        .context(DialSnafu { address: &address })?;
        stream
            .set_nodelay(true)
            .context(DialSnafu { address: &address })?;

        let connection = Self::handshake(cache, stream, timeouts).await?;
        tracing::debug!(%address, db = cache.db, "cache connection established");
        Ok(connection)
    }

    /// Authenticate, select the database, and probe. The driver task is owned
    /// by the returned connection so `close` can always stop it.
    async fn handshake<S>(
        cache: &CacheConfig,
        stream: S,
        timeouts: Timeouts,
    ) -> Result<Self, ConnectError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let address = cache.address();
        let info = cache.connection_info();

        let (mut connection, driver) =
            MultiplexedConnection::new_with_config(&info.redis, stream, timeouts.to_async_config())
                .await
                .context(ConnectSnafu { address: &address })?;
        let driver = tokio::spawn(driver);

        if let Err(source) = probe(&mut connection).await {
            driver.abort();
            return Err(ConnectError::Probe { address, source });
        }

        Ok(Self {
            address,
            connection,
            driver,
            tunnel: None,
        })
    }

    /// A handle to the cache client. Clones share the same connection.
    pub fn client(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    pub fn client_mut(&mut self) -> &mut MultiplexedConnection {
        &mut self.connection
    }

    /// Cache server address as configured (`host:port`).
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_tunneled(&self) -> bool {
        self.tunnel.is_some()
    }

    pub fn tunnel(&self) -> Option<&Tunnel> {
        self.tunnel.as_ref()
    }

    /// Round-trip a `PING`.
    pub async fn ping(&mut self) -> RedisResult<()> {
        probe(&mut self.connection).await
    }

    /// Close the cache client, then the tunnel.
    ///
    /// Stopping the driver ends every clone handed out by [`client`](Self::client).
    /// Both steps are attempted; failures are logged and kept in the report.
    pub async fn close(self) -> CloseReport {
        let Self {
            address,
            connection,
            driver,
            tunnel,
        } = self;
        let mut report = CloseReport::new(address.clone(), tunnel.is_some());

        drop(connection);
        driver.abort();
        if let Err(source) = driver.await {
            if source.is_panic() {
                report.record(CloseWarning::DriverPanicked {
                    address: address.clone(),
                    source,
                });
            }
        }

        if let Some(tunnel) = tunnel {
            if let Err(source) = tunnel.disconnect().await {
                report.record(CloseWarning::TunnelDisconnect {
                    address: address.clone(),
                    source,
                });
            }
        }

        tracing::debug!(%address, "cache connection closed");
        report
    }
}

async fn probe(connection: &mut MultiplexedConnection) -> RedisResult<()> {
    let _: String = redis::cmd("PING").query_async(connection).await?;
    Ok(())
}

/// Best-effort teardown of a tunnel whose cache connection never came up.
async fn release_tunnel(tunnel: Tunnel) {
    if let Err(e) = tunnel.disconnect().await {
        tracing::debug!("failed to disconnect tunnel after setup failure: {}", e);
    }
}
