//! Memory Registry
//!
//! Owns the service and endpoint stores, their expiration sweepers and the
//! health status, and hands out the server chains that front the stores.

use crate::chain::{Chain, MetadataStage, StoreStage, UpdatePathStage};
use crate::config::RegistryConfig;
use crate::domain::{EntryKind, NetworkService, NetworkServiceEndpoint, RegistryEntry};
use crate::error::Result;
use crate::health::{HealthReporter, ServingStatus};
use crate::metrics::RegistryMetrics;
use crate::registry::expire::spawn_sweeper;
use crate::registry::store::Store;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// In-memory registry for network services and endpoints
pub struct MemoryRegistry {
    config: RegistryConfig,
    services: Arc<Store<NetworkService>>,
    endpoints: Arc<Store<NetworkServiceEndpoint>>,
    health: Arc<HealthReporter>,
    metrics: Arc<RegistryMetrics>,
    shutdown: CancellationToken,
    sweepers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistry")
            .field("name", &self.config.name)
            .field("services", &self.services.len())
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

impl MemoryRegistry {
    /// Create a registry; call [`MemoryRegistry::start`] to begin serving
    pub fn new(config: RegistryConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let metrics = Arc::new(RegistryMetrics::new()?);
        let services = Store::new(&config, metrics.clone());
        let endpoints = Store::new(&config, metrics.clone());

        Ok(Arc::new(Self {
            config,
            services,
            endpoints,
            health: Arc::new(HealthReporter::new()),
            metrics,
            shutdown: CancellationToken::new(),
            sweepers: Mutex::new(Vec::new()),
        }))
    }

    /// Start the expiration sweeper and report serving
    pub fn start(&self) {
        let mut sweepers = self.sweepers.lock();
        if !sweepers.is_empty() || self.shutdown.is_cancelled() {
            return;
        }

        sweepers.push(spawn_sweeper(
            self.endpoints.clone(),
            self.config.sweep_interval,
            self.shutdown.child_token(),
        ));
        self.set_health(ServingStatus::Serving);

        info!(
            name = %self.config.name,
            expire_period = ?self.config.effective_expire_period(),
            "Registry started"
        );
    }

    /// Stop accepting mutations, stop the sweeper and report not serving
    pub async fn shutdown(&self) {
        info!(name = %self.config.name, "Registry shutting down");
        self.set_health(ServingStatus::NotServing);
        self.services.close();
        self.endpoints.close();
        self.shutdown.cancel();

        let sweepers: Vec<_> = self.sweepers.lock().drain(..).collect();
        for handle in sweepers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Expiration sweeper ended abnormally");
            }
        }
    }

    fn set_health(&self, status: ServingStatus) {
        for kind in [EntryKind::Ns, EntryKind::Nse] {
            self.health.set(kind.service_name(), status);
        }
    }

    /// Server chain fronting `store`: path restore, path update, storage
    fn server_chain<E: RegistryEntry>(&self, store: &Arc<Store<E>>) -> Chain<E> {
        Chain::builder()
            .stage(MetadataStage::server())
            .stage(UpdatePathStage::new(
                self.config.name.clone(),
                self.config.max_token_lifetime,
            ))
            .stage(StoreStage::new(store.clone()))
            .build()
    }

    pub fn service_chain(&self) -> Chain<NetworkService> {
        self.server_chain(&self.services)
    }

    pub fn endpoint_chain(&self) -> Chain<NetworkServiceEndpoint> {
        self.server_chain(&self.endpoints)
    }

    pub fn services(&self) -> &Arc<Store<NetworkService>> {
        &self.services
    }

    pub fn endpoints(&self) -> &Arc<Store<NetworkServiceEndpoint>> {
        &self.endpoints
    }

    pub fn health(&self) -> &Arc<HealthReporter> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Token cancelled when the registry shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CallContext, Query};
    use crate::error::Error;
    use crate::registry::collect_entries;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lifecycle_and_health() {
        let registry = MemoryRegistry::new(RegistryConfig::default()).unwrap();
        let health = registry.health().clone();
        assert_eq!(
            health.status(EntryKind::Nse.service_name()),
            ServingStatus::ServiceUnknown
        );

        registry.start();
        assert_eq!(
            health.status(EntryKind::Nse.service_name()),
            ServingStatus::Serving
        );
        assert_eq!(
            health.status(EntryKind::Ns.service_name()),
            ServingStatus::Serving
        );

        registry.shutdown().await;
        assert_eq!(
            health.status(EntryKind::Nse.service_name()),
            ServingStatus::NotServing
        );

        let result = registry
            .endpoint_chain()
            .register(&mut CallContext::new(), NetworkServiceEndpoint::new("nse-1"))
            .await;
        assert_matches!(result, Err(Error::ShuttingDown));
    }

    #[tokio::test]
    async fn test_sweeper_evicts_endpoints() {
        let registry = MemoryRegistry::new(
            RegistryConfig::default().with_expire_period(Duration::from_millis(200)),
        )
        .unwrap();
        registry.start();

        let chain = registry.endpoint_chain();
        chain
            .register(&mut CallContext::new(), NetworkServiceEndpoint::new("nse-1"))
            .await
            .unwrap();
        assert!(registry.endpoints().contains("nse-1"));

        tokio::time::sleep(Duration::from_millis(600)).await;
        let found = chain
            .find(
                &mut CallContext::new(),
                Query::new(NetworkServiceEndpoint::new("nse-1")),
            )
            .await
            .unwrap();
        assert!(collect_entries(found).await.unwrap().is_empty());

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_chain_records_path() {
        let registry = MemoryRegistry::new(RegistryConfig::default()).unwrap();
        let mut ctx = CallContext::new();

        registry
            .service_chain()
            .register(&mut ctx, NetworkService::new("ns-1"))
            .await
            .unwrap();

        let path = ctx.path.unwrap();
        assert_eq!(path.segments[0].name, "registry");
        assert!(registry.services().contains("ns-1"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RegistryConfig {
            name: String::new(),
            ..Default::default()
        };
        assert_matches!(MemoryRegistry::new(config), Err(Error::Configuration(_)));
    }
}
