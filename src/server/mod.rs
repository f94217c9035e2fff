//! HTTP server distributing the latest frame as an MJPEG stream
//!
//! Routes:
//! - `GET /`       viewer page embedding `/stream`
//! - `GET /stream` `multipart/x-mixed-replace` body, one part per pull
//! - anything else 404 (405 for non-GET methods)

mod connection;
mod http;
mod stats;

pub use connection::ConnectionError;
pub use stats::{ServerStats, StatsHandle};

use crate::config::{ConfigError, ServerConfig};
use crate::frame::FrameSlot;
use connection::{handle_connection, ConnectionContext};
use stats::ServerCounters;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept`, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Owned handle to one MJPEG HTTP server.
///
/// Reads frames from the `FrameSlot` it was created with. `start` and
/// `stop` may be called any number of times; each `start` after a `stop`
/// binds a fresh listener.
pub struct StreamingServer {
    slot: FrameSlot,
    counters: Arc<ServerCounters>,
    state: ServerState,
    running: Option<RunningServer>,
}

struct RunningServer {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl StreamingServer {
    pub fn new(slot: FrameSlot) -> Self {
        Self {
            slot,
            counters: Arc::new(ServerCounters::default()),
            state: ServerState::Stopped,
            running: None,
        }
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Returns the bound address, which tells the caller the real port when
    /// `config.port` is 0. Calling this while running returns the current
    /// address and ignores `config`.
    pub async fn start(&mut self, config: ServerConfig) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            debug!(addr = %running.local_addr, "Server already running");
            return Ok(running.local_addr);
        }

        config.validate()?;
        self.state = ServerState::Starting;

        let addr = config.bind_addr();
        let bound = match TcpListener::bind(&addr).await {
            Ok(listener) => listener.local_addr().map(|local| (listener, local)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                self.state = ServerState::Stopped;
                error!(addr = %addr, error = %source, "Failed to bind MJPEG server");
                return Err(ServerError::Bind { addr, source });
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(ConnectionContext {
            content_type: config.content_type(),
            config,
            slot: self.slot.clone(),
            counters: Arc::clone(&self.counters),
            shutdown: shutdown_rx,
        });

        let accept_task = tokio::spawn(accept_loop(listener, ctx));

        self.running = Some(RunningServer {
            local_addr,
            shutdown_tx,
            accept_task,
        });
        self.state = ServerState::Running;

        info!(addr = %local_addr, "MJPEG server started");
        Ok(local_addr)
    }

    /// Close the listener and every client connection, then clear the frame
    /// slot. Does nothing when already stopped.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        self.state = ServerState::Stopping;
        info!(addr = %running.local_addr, "Stopping MJPEG server");

        let _ = running.shutdown_tx.send(true);
        if let Err(e) = running.accept_task.await {
            error!(error = %e, "Accept task ended abnormally");
        }

        self.slot.clear();
        self.state = ServerState::Stopped;

        let stats = self.counters.snapshot();
        info!(
            connections = %stats.total_connections,
            parts = %stats.parts_sent,
            "MJPEG server stopped"
        );
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Address of the listening socket while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle(Arc::clone(&self.counters))
    }
}

impl Drop for StreamingServer {
    fn drop(&mut self) {
        // Connection tasks notice the signal and close their sockets; the
        // listener goes away with the accept task.
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(true);
        }
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ConnectionContext>) {
    let mut shutdown = ctx.shutdown.clone();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    connections.spawn(handle_connection(socket, peer, Arc::clone(&ctx)));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!(error = %e, "Connection task panicked");
                    }
                }
            }
        }
    }

    // No new connections from here on.
    drop(listener);

    let grace = ctx.config.shutdown_grace();
    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            remaining = %connections.len(),
            "Connections still open after grace period, aborting"
        );
        connections.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            bind_ip: "127.0.0.1".to_string(),
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut server = StreamingServer::new(FrameSlot::new());
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());

        let addr = server.start(local_config()).await.unwrap();
        assert!(server.is_running());
        assert_ne!(addr.port(), 0);
        assert_eq!(server.local_addr(), Some(addr));

        // Starting again keeps the existing listener.
        assert_eq!(server.start(local_config()).await.unwrap(), addr);

        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_clears_slot() {
        let slot = FrameSlot::new();
        let mut server = StreamingServer::new(slot.clone());
        server.start(local_config()).await.unwrap();

        slot.set(bytes::Bytes::from_static(b"frame"));
        server.stop().await;
        assert!(slot.get().is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut server = StreamingServer::new(FrameSlot::new());
        let config = ServerConfig {
            boundary: String::new(),
            ..local_config()
        };
        assert!(matches!(
            server.start(config).await,
            Err(ServerError::Config(_))
        ));
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ServerState::Running.to_string(), "running");
        assert_eq!(ServerState::Stopped.to_string(), "stopped");
    }
}
