//! Update Path Stage
//!
//! Server-side stage recording this registry as a hop of the call path. The
//! caller's path position is restored once the call returns so the caller
//! sees the hop appended after its own segment.

use crate::chain::{Next, Stage};
use crate::domain::{CallContext, Path, PathSegment, Query, RegistryEntry};
use crate::error::Result;
use crate::registry::expire::chrono_duration;
use crate::registry::FindStream;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

/// Adds or refreshes this registry's segment in the call path
#[derive(Debug, Clone)]
pub struct UpdatePathStage {
    name: String,
    max_token_lifetime: Duration,
}

impl UpdatePathStage {
    pub fn new(name: impl Into<String>, max_token_lifetime: Duration) -> Self {
        Self {
            name: name.into(),
            max_token_lifetime,
        }
    }

    /// Move the path to this registry's segment, returning the caller's index
    pub fn update(&self, ctx: &mut CallContext) -> usize {
        let expires = Utc::now() + chrono_duration(self.max_token_lifetime);
        let token = ctx.token.clone();
        let path = ctx.path.get_or_insert_with(Path::default);
        let previous = path.index;

        let segment = PathSegment {
            name: self.name.clone(),
            id: uuid::Uuid::new_v4().to_string(),
            token,
            expires: Some(expires),
        };

        if path.segments.is_empty() {
            path.index = 0;
            path.segments.push(segment);
            return previous;
        }

        // An index past the end is treated as pointing at the last hop
        path.index = path.index.min(path.segments.len() - 1);

        let is_ours = |segment: Option<&PathSegment>| segment.map_or(false, |s| s.name == self.name);
        let position = if is_ours(path.segments.get(path.index)) {
            path.index
        } else if is_ours(path.segments.get(path.index + 1)) {
            path.index + 1
        } else {
            // Hops past the caller belong to a previous route
            path.segments.truncate(path.index + 1);
            path.segments.push(segment.clone());
            path.index + 1
        };

        path.index = position;
        let current = &mut path.segments[position];
        current.token = segment.token;
        current.expires = segment.expires;
        previous
    }

    fn restore(ctx: &mut CallContext, previous: usize) {
        if let Some(path) = ctx.path.as_mut() {
            path.index = previous;
        }
    }
}

#[async_trait]
impl<E: RegistryEntry> Stage<E> for UpdatePathStage {
    async fn register(&self, ctx: &mut CallContext, entry: E, next: Next<E>) -> Result<E> {
        let previous = self.update(ctx);
        let result = next.register(ctx, entry).await;
        Self::restore(ctx, previous);
        result
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: Query<E>,
        next: Next<E>,
    ) -> Result<FindStream<E>> {
        let previous = self.update(ctx);
        let result = next.find(ctx, query).await;
        Self::restore(ctx, previous);
        result
    }

    async fn unregister(&self, ctx: &mut CallContext, entry: E, next: Next<E>) -> Result<()> {
        let previous = self.update(ctx);
        let result = next.unregister(ctx, entry).await;
        Self::restore(ctx, previous);
        result
    }
}
