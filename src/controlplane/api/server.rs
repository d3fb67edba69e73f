//! Plugin API Server
//!
//! Serves the plugin router on a Unix socket (the way Docker discovers
//! plugins under `/run/docker/plugins`) or on a TCP address, plus an
//! optional Prometheus metrics listener.

use crate::error::{Error, Result};
use axum::extract::Request;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tower::Service;
use tracing::{debug, error, info, warn};

use super::rest::PluginRouter;

/// Socket Docker looks for when the plugin is named `linstor`
pub const DEFAULT_SOCKET: &str = "/run/docker/plugins/linstor.sock";

// =============================================================================
// Server Configuration
// =============================================================================

/// Where the plugin API listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listen {
    /// Unix domain socket, replaced if a stale one exists
    Unix(PathBuf),
    /// TCP address, for plugins registered by URL
    Tcp(SocketAddr),
}

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct PluginServerConfig {
    pub listen: Listen,
    /// Metrics bind address, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for PluginServerConfig {
    fn default() -> Self {
        Self {
            listen: Listen::Unix(PathBuf::from(DEFAULT_SOCKET)),
            metrics_addr: None,
        }
    }
}

// =============================================================================
// Plugin Server
// =============================================================================

/// Docker volume plugin server
pub struct PluginServer {
    config: PluginServerConfig,
    router: PluginRouter,
    shutdown_tx: broadcast::Sender<()>,
}

impl PluginServer {
    pub fn new(config: PluginServerConfig, router: PluginRouter) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            router,
            shutdown_tx,
        }
    }

    /// Run until shutdown is triggered or the listener fails
    pub async fn run(&self) -> Result<()> {
        if let Some(addr) = self.config.metrics_addr {
            let metrics = self.router.metrics();
            let shutdown_rx = self.shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = serve_tcp(addr, metrics, shutdown_rx).await {
                    error!(error = %e, "Metrics server error");
                }
            });
        }

        let app = self.router.build();
        let shutdown_rx = self.shutdown_tx.subscribe();
        match &self.config.listen {
            Listen::Unix(path) => serve_unix(path, app, shutdown_rx).await,
            Listen::Tcp(addr) => serve_tcp(*addr, app, shutdown_rx).await,
        }
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn serve_tcp(
    addr: SocketAddr,
    app: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Listening on TCP");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!(addr = %addr, "TCP listener shutting down");
        })
        .await?;

    Ok(())
}

/// Bind a Unix socket, removing a stale socket file left by a previous run
fn bind_unix(path: &Path) -> Result<UnixListener> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    UnixListener::bind(path).map_err(|e| {
        Error::Configuration(format!("cannot bind {}: {}", path.display(), e))
    })
}

async fn serve_unix(
    path: &Path,
    app: Router,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = bind_unix(path)?;
    info!(socket = %path.display(), "Listening on Unix socket");

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            },
            _ = shutdown_rx.recv() => break,
        };

        let router = app.clone();
        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |request: Request<Incoming>| {
                router.clone().call(request)
            });
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(error = %e, "Connection closed with error");
            }
        });
    }

    info!(socket = %path.display(), "Unix listener shutting down");
    if let Err(e) = std::fs::remove_file(path) {
        warn!(socket = %path.display(), error = %e, "Could not remove socket");
    }
    Ok(())
}
