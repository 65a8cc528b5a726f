//! API Server
//!
//! Serves the REST router on every configured listen address until shutdown.

use crate::error::{Error, Result};
use crate::registry::MemoryRegistry;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::rest::RestRouter;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Addresses to listen on
    pub listen_on: Vec<SocketAddr>,
    /// Upper bound on a single registry call
    pub request_timeout: Duration,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            listen_on: vec![SocketAddr::from(([0, 0, 0, 0], 5002))],
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST server in front of a [`MemoryRegistry`]
pub struct ApiServer {
    config: ApiServerConfig,
    registry: Arc<MemoryRegistry>,
    shutdown: CancellationToken,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, registry: Arc<MemoryRegistry>) -> Self {
        Self {
            config,
            registry,
            shutdown: CancellationToken::new(),
        }
    }

    /// Bind every listen address and serve until [`ApiServer::shutdown`]
    pub async fn run(&self) -> Result<()> {
        let listeners = self.bind().await?;
        self.serve(listeners).await
    }

    /// Bind every listen address; fails if any of them cannot be bound
    pub async fn bind(&self) -> Result<Vec<TcpListener>> {
        if self.config.listen_on.is_empty() {
            return Err(Error::Configuration("no listen address configured".into()));
        }

        let mut listeners = Vec::with_capacity(self.config.listen_on.len());
        for addr in &self.config.listen_on {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|e| Error::Internal(format!("Failed to bind {}: {}", addr, e)))?;
            info!("REST API listening on {}", listener.local_addr()?);
            listeners.push(listener);
        }
        Ok(listeners)
    }

    /// Serve the REST API on already bound listeners until shutdown
    pub async fn serve(&self, listeners: Vec<TcpListener>) -> Result<()> {
        let app = RestRouter::new(self.registry.clone(), self.config.request_timeout).build();

        let handles: Vec<_> = listeners
            .into_iter()
            .map(|listener| {
                tokio::spawn(serve_listener(
                    listener,
                    app.clone(),
                    self.shutdown.child_token(),
                ))
            })
            .collect();

        let mut result = Ok(());
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("REST server error: {}", e);
                    result = Err(e);
                }
                Err(e) => {
                    error!("REST server task failed: {:?}", e);
                    result = Err(Error::Internal(format!("REST server task failed: {}", e)));
                }
            }
        }
        result
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Serve one listener until shutdown is signalled
async fn serve_listener(listener: TcpListener, app: Router, shutdown: CancellationToken) -> Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("REST server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("REST server error: {}", e)))
}
