//! Store Stage
//!
//! Terminal server-side stage applying calls to an entry store.

use crate::chain::{Next, Stage};
use crate::domain::{CallContext, Query, RegistryEntry};
use crate::error::{Error, Result};
use crate::registry::{FindStream, Store};
use async_trait::async_trait;
use std::sync::Arc;

/// Terminal stage backed by a [`Store`]
pub struct StoreStage<E: RegistryEntry> {
    store: Arc<Store<E>>,
}

impl<E: RegistryEntry> StoreStage<E> {
    pub fn new(store: Arc<Store<E>>) -> Self {
        Self { store }
    }
}

impl<E: RegistryEntry> std::fmt::Debug for StoreStage<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreStage").field("store", &self.store).finish()
    }
}

fn ensure_live(ctx: &CallContext) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

#[async_trait]
impl<E: RegistryEntry> Stage<E> for StoreStage<E> {
    async fn register(&self, ctx: &mut CallContext, entry: E, _next: Next<E>) -> Result<E> {
        ensure_live(ctx)?;
        self.store.register(entry)
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: Query<E>,
        _next: Next<E>,
    ) -> Result<FindStream<E>> {
        ensure_live(ctx)?;
        Ok(self.store.find(query, ctx.cancel.clone()))
    }

    async fn unregister(&self, ctx: &mut CallContext, entry: E, _next: Next<E>) -> Result<()> {
        ensure_live(ctx)?;
        self.store.unregister(entry.name()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::config::RegistryConfig;
    use crate::domain::NetworkServiceEndpoint;
    use crate::metrics::RegistryMetrics;
    use crate::registry::collect_entries;
    use assert_matches::assert_matches;

    fn chain() -> (Arc<Store<NetworkServiceEndpoint>>, Chain<NetworkServiceEndpoint>) {
        let store = Store::new(
            &RegistryConfig::default(),
            Arc::new(RegistryMetrics::new().unwrap()),
        );
        let chain = Chain::builder().stage(StoreStage::new(store.clone())).build();
        (store, chain)
    }

    #[tokio::test]
    async fn test_calls_reach_store() {
        let (store, chain) = chain();
        let mut ctx = CallContext::new();

        let entry = chain
            .register(&mut ctx, NetworkServiceEndpoint::default().with_service("ns-1"))
            .await
            .unwrap();
        assert!(store.contains(&entry.name));

        let found = chain
            .find(&mut ctx, Query::new(NetworkServiceEndpoint::for_service("ns-1")))
            .await
            .unwrap();
        assert_eq!(collect_entries(found).await.unwrap(), vec![entry.clone()]);

        chain.unregister(&mut ctx, entry.clone()).await.unwrap();
        assert!(!store.contains(&entry.name));
    }

    #[tokio::test]
    async fn test_cancelled_call_is_rejected() {
        let (store, chain) = chain();
        let mut ctx = CallContext::new();
        ctx.cancel.cancel();

        let result = chain
            .register(&mut ctx, NetworkServiceEndpoint::new("nse-1"))
            .await;
        assert_matches!(result, Err(Error::Cancelled));
        assert!(store.is_empty());
    }
}
