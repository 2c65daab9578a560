//! Spectrum server listener
//!
//! Handles the TCP accept loop and spawns one connection handler per client.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::events::{run_error_logger, ErrorSink};
use crate::registry::ChannelRegistry;

/// First pause after a failed accept
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);

/// Longest pause between accept attempts
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after `failures` consecutive accept errors, doubling up to a cap
fn accept_backoff(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << shift)
        .min(ACCEPT_BACKOFF_MAX)
}

/// Spectrum simulator server
pub struct SpectrumServer {
    config: ServerConfig,
    listener: TcpListener,
    registry: Arc<ChannelRegistry>,
    errors: ErrorSink,
    next_connection_id: AtomicU64,
}

impl SpectrumServer {
    /// Bind the listening socket and start the error logger
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;

        let (errors, error_rx) = ErrorSink::channel();
        tokio::spawn(run_error_logger(error_rx));

        info!(addr = %listener.local_addr()?, "Spectrum server listening");

        Ok(Self {
            config,
            listener,
            registry: Arc::new(ChannelRegistry::new(errors.clone())),
            errors,
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get a reference to the channel registry
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Accept clients forever
    pub async fn run(&self) {
        self.accept_loop().await
    }

    /// Accept clients until `shutdown` resolves, then stop every channel
    ///
    /// Connections still open see the registry shut down and close.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => info!("Shutdown signal received"),
            _ = self.accept_loop() => {}
        }

        self.registry.shutdown();
    }

    async fn accept_loop(&self) {
        let mut failures = 0u32;
        loop {
            match self.listener.accept().await {
                Ok((socket, peer_addr)) => {
                    failures = 0;
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    // Back off on persistent errors such as EMFILE
                    failures = failures.saturating_add(1);
                    let delay = accept_backoff(failures);
                    error!(error = %e, retry_in = ?delay, "Failed to accept connection");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                error!(connection = id, error = %e, "Failed to configure socket");
                return;
            }
        }

        let connection = Connection::new(
            id,
            peer_addr.to_string(),
            socket,
            Arc::clone(&self.registry),
            self.errors.clone(),
        );
        tokio::spawn(connection.run());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(2), Duration::from_millis(20));
        assert_eq!(accept_backoff(5), Duration::from_millis(160));
        assert_eq!(accept_backoff(8), ACCEPT_BACKOFF_MAX);
        assert_eq!(accept_backoff(u32::MAX), ACCEPT_BACKOFF_MAX);
        assert!(accept_backoff(0) > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_bind_reports_local_addr() {
        let config = ServerConfig::default().bind("127.0.0.1:0".parse().unwrap());
        let server = SpectrumServer::bind(config).await.unwrap();

        let addr = server.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert_eq!(server.registry().channel_count(), 0);
    }
}
