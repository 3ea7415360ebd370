// ABOUTME: Local TCP port forwarding through an SSH tunnel.
// ABOUTME: Each accepted connection gets its own direct-tcpip channel to a fixed target.

use super::client::open_stream;
use super::error::{Error, Result};
use super::host_key::HostKeyVerifier;
use russh::client::Handle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};

/// How long in-flight connections may keep running after a stop request.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Extra time `stop` allows the forwarder to wind down before aborting it.
const STOP_SLACK: Duration = Duration::from_millis(500);

/// Handle for managing a forwarded port.
pub(crate) struct ForwardHandle {
    local_addr: SocketAddr,
    /// Signal to stop the accept loop.
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl ForwardHandle {
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and end the ones in flight.
    pub(crate) async fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(STOP_GRACE + STOP_SLACK, &mut task)
                .await
                .is_err()
            {
                tracing::debug!(local = %self.local_addr, "forwarder did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for ForwardHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Start forwarding a local TCP port to `host:port` through the tunnel.
pub(crate) async fn start_forward(
    handle: Arc<Handle<HostKeyVerifier>>,
    bind: SocketAddr,
    host: String,
    port: u16,
) -> Result<ForwardHandle> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| Error::ForwardFailed(format!("failed to bind {}: {}", bind, e)))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| Error::ForwardFailed(format!("failed to read bound address: {}", e)))?;

    let shutdown = Arc::new(Notify::new());
    let task = tokio::spawn(run_forwarder(listener, handle, host, port, shutdown.clone()));

    tracing::info!(local = %local_addr, "port forwarding started");

    Ok(ForwardHandle {
        local_addr,
        shutdown,
        task: Some(task),
    })
}

/// Accept connections and forward each one until shutdown.
///
/// On shutdown the listener closes first. Connections still in flight get
/// `STOP_GRACE` to finish and are then aborted.
async fn run_forwarder(
    listener: TcpListener,
    handle: Arc<Handle<HostKeyVerifier>>,
    host: String,
    port: u16,
    shutdown: Arc<Notify>,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    let handle = Arc::clone(&handle);
                    let host = host.clone();
                    connections.spawn(async move {
                        if let Err(e) = forward_connection(stream, peer, &handle, &host, port).await {
                            tracing::debug!("Forward connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Accept error on forwarded port: {}", e);
                    break;
                }
            },
        }
    }
    drop(listener);

    if connections.is_empty() {
        return;
    }
    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(STOP_GRACE, drain).await.is_err() {
        tracing::debug!(
            remaining = connections.len(),
            "aborting in-flight forwarded connections"
        );
        connections.abort_all();
        while connections.join_next().await.is_some() {}
    }
}

/// Forward a single connection through the tunnel.
async fn forward_connection(
    mut local_stream: TcpStream,
    peer: SocketAddr,
    handle: &Handle<HostKeyVerifier>,
    host: &str,
    port: u16,
) -> Result<()> {
    let mut remote_stream = open_stream(handle, host, port, Some(peer)).await?;

    let (sent, received) = tokio::io::copy_bidirectional(&mut local_stream, &mut remote_stream)
        .await
        .map_err(|e| Error::ForwardFailed(e.to_string()))?;

    tracing::debug!(%peer, sent, received, "forwarded connection closed");
    Ok(())
}
