//! Chain Pipeline
//!
//! Every register, find and unregister call passes through an ordered list of
//! stages. A stage may inspect or rewrite the call, forward it to the rest of
//! the chain through [`Next`], act on the result on the way back, or return
//! early without forwarding. The last stage is the terminal one: the entry
//! store on the server side, a network transport on the client side.

pub mod begin;
pub mod metadata;
pub mod refresh;
pub mod store;
pub mod updatepath;

pub use begin::*;
pub use metadata::*;
pub use refresh::*;
pub use store::*;
pub use updatepath::*;

use crate::domain::{CallContext, Query, RegistryEntry};
use crate::error::Result;
use crate::registry::FindStream;
use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Stage (Port)
// =============================================================================

/// One element of a chain.
///
/// Every method forwards to `next` unless overridden, so a stage only
/// implements the operations it cares about.
#[async_trait]
pub trait Stage<E: RegistryEntry>: Send + Sync + 'static {
    async fn register(&self, ctx: &mut CallContext, entry: E, next: Next<E>) -> Result<E> {
        next.register(ctx, entry).await
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: Query<E>,
        next: Next<E>,
    ) -> Result<FindStream<E>> {
        next.find(ctx, query).await
    }

    async fn unregister(&self, ctx: &mut CallContext, entry: E, next: Next<E>) -> Result<()> {
        next.unregister(ctx, entry).await
    }
}

// =============================================================================
// Next
// =============================================================================

/// Handle to the remainder of a chain, passed to each stage
pub struct Next<E: RegistryEntry> {
    stages: Arc<[Arc<dyn Stage<E>>]>,
    index: usize,
}

impl<E: RegistryEntry> Clone for Next<E> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            index: self.index,
        }
    }
}

impl<E: RegistryEntry> fmt::Debug for Next<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl<E: RegistryEntry> Next<E> {
    /// Handle that behaves like the end of a chain
    pub fn end() -> Self {
        Self {
            stages: Arc::from(Vec::<Arc<dyn Stage<E>>>::new()),
            index: 0,
        }
    }

    /// Number of stages left to run
    pub fn remaining(&self) -> usize {
        self.stages.len().saturating_sub(self.index)
    }

    /// Copy of this handle that holds only the remaining stages.
    ///
    /// Background work started by a stage keeps the stages after it alive
    /// without keeping the stage itself (or those before it) alive.
    pub fn detach(&self) -> Self {
        Self {
            stages: self.stages[self.index.min(self.stages.len())..]
                .iter()
                .cloned()
                .collect(),
            index: 0,
        }
    }

    fn split(self) -> Option<(Arc<dyn Stage<E>>, Next<E>)> {
        let stage = self.stages.get(self.index)?.clone();
        let rest = Next {
            stages: self.stages,
            index: self.index + 1,
        };
        Some((stage, rest))
    }

    /// Run the remaining stages; past the end the entry comes back unchanged
    pub async fn register(self, ctx: &mut CallContext, entry: E) -> Result<E> {
        match self.split() {
            Some((stage, rest)) => stage.register(ctx, entry, rest).await,
            None => Ok(entry),
        }
    }

    /// Run the remaining stages; past the end the result is empty
    pub async fn find(self, ctx: &mut CallContext, query: Query<E>) -> Result<FindStream<E>> {
        match self.split() {
            Some((stage, rest)) => stage.find(ctx, query, rest).await,
            None => Ok(stream::empty().boxed()),
        }
    }

    /// Run the remaining stages; past the end nothing happens
    pub async fn unregister(self, ctx: &mut CallContext, entry: E) -> Result<()> {
        match self.split() {
            Some((stage, rest)) => stage.unregister(ctx, entry, rest).await,
            None => Ok(()),
        }
    }
}

// =============================================================================
// Chain
// =============================================================================

/// Ordered composition of stages, callable as one unit
pub struct Chain<E: RegistryEntry> {
    stages: Arc<[Arc<dyn Stage<E>>]>,
}

impl<E: RegistryEntry> Clone for Chain<E> {
    fn clone(&self) -> Self {
        Self {
            stages: self.stages.clone(),
        }
    }
}

impl<E: RegistryEntry> fmt::Debug for Chain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("kind", &E::KIND)
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl<E: RegistryEntry> Chain<E> {
    pub fn builder() -> ChainBuilder<E> {
        ChainBuilder { stages: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn head(&self) -> Next<E> {
        Next {
            stages: self.stages.clone(),
            index: 0,
        }
    }

    pub async fn register(&self, ctx: &mut CallContext, entry: E) -> Result<E> {
        self.head().register(ctx, entry).await
    }

    pub async fn find(&self, ctx: &mut CallContext, query: Query<E>) -> Result<FindStream<E>> {
        self.head().find(ctx, query).await
    }

    pub async fn unregister(&self, ctx: &mut CallContext, entry: E) -> Result<()> {
        self.head().unregister(ctx, entry).await
    }
}

/// A chain used as a stage is terminal: the outer chain ends with it
#[async_trait]
impl<E: RegistryEntry> Stage<E> for Chain<E> {
    async fn register(&self, ctx: &mut CallContext, entry: E, _next: Next<E>) -> Result<E> {
        Chain::register(self, ctx, entry).await
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: Query<E>,
        _next: Next<E>,
    ) -> Result<FindStream<E>> {
        Chain::find(self, ctx, query).await
    }

    async fn unregister(&self, ctx: &mut CallContext, entry: E, _next: Next<E>) -> Result<()> {
        Chain::unregister(self, ctx, entry).await
    }
}

/// Builder assembling a chain from its stages, outermost first
pub struct ChainBuilder<E: RegistryEntry> {
    stages: Vec<Arc<dyn Stage<E>>>,
}

impl<E: RegistryEntry> ChainBuilder<E> {
    /// Append a stage
    pub fn stage(mut self, stage: impl Stage<E>) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a stage that is shared with other chains
    pub fn shared(mut self, stage: Arc<dyn Stage<E>>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Chain<E> {
        Chain {
            stages: self.stages.into(),
        }
    }
}
