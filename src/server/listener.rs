//! TCP listener serving the router over HTTP/1.1 and h2c.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};

use crate::config::ServerConfig;
use crate::error::{AppError, Result};
use crate::shutdown::{wait_for_shutdown, ShutdownCoordinator};

/// Bound TCP listener tied to a shutdown coordinator.
pub struct HttpListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: ShutdownCoordinator,
}

impl HttpListener {
    /// Bind `config.listen_addr`. Port 0 picks a free port.
    pub async fn bind(config: &ServerConfig, shutdown: ShutdownCoordinator) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await.map_err(|e| {
            AppError::Server(format!("Failed to bind {}: {}", config.listen_addr, e))
        })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(%local_addr, "HTTP listener bound");

        Ok(Self {
            listener,
            local_addr,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until shutdown is signaled.
    ///
    /// Open connections are asked to finish gracefully once shutdown starts;
    /// in-flight chat sessions end on the same signal.
    pub async fn serve(self, app: Router) {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
                result = self.listener.accept() => result,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let app = app.clone();
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        serve_connection(stream, peer, app, shutdown).await;
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "Accept error");
                    // Brief backoff on error
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        tracing::info!("Accept loop terminated");
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    shutdown: ShutdownCoordinator,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let io = TokioIo::new(stream);
    let service = TowerToHyperService::new(app);
    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let mut shutdown_rx = shutdown.subscribe();
    let mut draining = false;
    let result = loop {
        tokio::select! {
            result = conn.as_mut() => break result,
            _ = wait_for_shutdown(&mut shutdown_rx), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    };

    if let Err(e) = result {
        // Clients hanging up mid-stream are routine.
        tracing::debug!(%peer, error = %e, "Connection closed with error");
    }
}
