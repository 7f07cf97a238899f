//! TCP listener for the chat server.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::connection::serve_connection;
use crate::chat::Registry;
use crate::config::ServerConfig;
use crate::{ChatError, Result};

/// How long shutdown waits for connections to say goodbye.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Chat server that accepts Telnet connections.
pub struct ChatServer {
    listener: TcpListener,
    semaphore: Arc<Semaphore>,
    max_connections: usize,
    max_line_length: usize,
    registry: Arc<Registry>,
}

impl ChatServer {
    /// Create a new ChatServer bound to the configured address.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        info!("Chat server listening on {}", local_addr);

        Ok(Self {
            listener,
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            max_line_length: config.max_line_length,
            registry: Arc::new(Registry::new()),
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get the shared participant registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Get the maximum number of connections allowed.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get the number of available connection slots.
    pub fn available_connections(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get the number of active connections.
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Accept a new connection.
    ///
    /// Waits for a free connection slot first, then for the next client.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit)> {
        if self.available_connections() == 0 {
            warn!(
                "Connection limit of {} reached, waiting for a free slot",
                self.max_connections
            );
        }
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ChatError::Transport("connection limiter closed".into()))?;

        let (stream, addr) = self.listener.accept().await?;
        debug!("Accepted connection from {}", addr);

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Serve connections until `shutdown` completes.
    ///
    /// Every connected session is then told to leave, and the server waits
    /// for their departures to be announced before returning.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.accept() => match accepted {
                    Ok((stream, addr, permit)) => {
                        info!(
                            "New connection from {} ({}/{} slots in use)",
                            addr,
                            self.active_connections(),
                            self.max_connections
                        );
                        let registry = Arc::clone(&self.registry);
                        let stop_rx = stop_rx.clone();
                        let max_line_length = self.max_line_length;
                        connections.spawn(async move {
                            let reason =
                                serve_connection(stream, addr, registry, stop_rx, max_line_length)
                                    .await;
                            drop(permit);
                            reason
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!("Connection task failed: {}", e);
                    }
                }
            }
        }

        info!(
            "Shutting down, {} connection(s) still open",
            connections.len()
        );
        let _ = stop_tx.send(true);

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while let Some(finished) = connections.join_next().await {
                if let Err(e) = finished {
                    warn!("Connection task failed: {}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("Gave up waiting for {} connection(s)", connections.len());
            connections.shutdown().await;
        }

        info!("Chat server stopped");
        Ok(())
    }

    /// Serve connections until the process receives Ctrl+C.
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C"),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        })
        .await
    }
}

/// A permit that represents an active connection slot.
///
/// When this permit is dropped, the connection slot is released.
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
