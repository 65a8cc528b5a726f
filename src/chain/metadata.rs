//! Metadata Propagation Stage
//!
//! Carries the call path across the process boundary. The client side writes
//! the path into the outgoing metadata and reads the updated path back from
//! the response metadata; the server side does the reverse. Every other
//! metadata key passes through untouched.

use crate::chain::{Next, Stage};
use crate::domain::{CallContext, Path, Query, RegistryEntry};
use crate::error::{Error, Result};
use crate::registry::FindStream;
use async_trait::async_trait;

/// Metadata key holding the encoded call path
pub const PATH_METADATA_KEY: &str = "x-registry-path";

/// Encode a path as a header-safe metadata value
pub fn encode_path(path: &Path) -> Result<String> {
    let json = serde_json::to_string(path)?;
    Ok(urlencoding::encode(&json).into_owned())
}

/// Decode a metadata value produced by [`encode_path`]
pub fn decode_path(value: &str) -> Result<Path> {
    let corrupted = |reason: String| Error::MetadataCorrupted {
        key: PATH_METADATA_KEY.to_string(),
        reason,
    };
    let json = urlencoding::decode(value).map_err(|e| corrupted(e.to_string()))?;
    serde_json::from_str(&json).map_err(|e| corrupted(e.to_string()))
}

/// Write `ctx.path` into the metadata
fn inject(ctx: &mut CallContext) -> Result<()> {
    if let Some(path) = &ctx.path {
        let value = encode_path(path)?;
        ctx.metadata.insert(PATH_METADATA_KEY.to_string(), value);
    }
    Ok(())
}

/// Restore `ctx.path` from the metadata
fn extract(ctx: &mut CallContext) -> Result<()> {
    if let Some(value) = ctx.metadata.get(PATH_METADATA_KEY) {
        ctx.path = Some(decode_path(value)?);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Server,
}

/// Path propagation stage for one side of the wire
#[derive(Debug, Clone)]
pub struct MetadataStage {
    side: Side,
}

impl MetadataStage {
    /// Stage placed just before the network transport
    pub fn client() -> Self {
        Self { side: Side::Client }
    }

    /// Stage placed first in the server chain
    pub fn server() -> Self {
        Self { side: Side::Server }
    }

    fn before(&self, ctx: &mut CallContext) -> Result<()> {
        match self.side {
            Side::Client => inject(ctx),
            Side::Server => extract(ctx),
        }
    }

    fn after(&self, ctx: &mut CallContext) -> Result<()> {
        match self.side {
            Side::Client => extract(ctx),
            Side::Server => inject(ctx),
        }
    }
}

#[async_trait]
impl<E: RegistryEntry> Stage<E> for MetadataStage {
    async fn register(&self, ctx: &mut CallContext, entry: E, next: Next<E>) -> Result<E> {
        self.before(ctx)?;
        let registered = next.register(ctx, entry).await?;
        self.after(ctx)?;
        Ok(registered)
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: Query<E>,
        next: Next<E>,
    ) -> Result<FindStream<E>> {
        self.before(ctx)?;
        let stream = next.find(ctx, query).await?;
        self.after(ctx)?;
        Ok(stream)
    }

    async fn unregister(&self, ctx: &mut CallContext, entry: E, next: Next<E>) -> Result<()> {
        self.before(ctx)?;
        next.unregister(ctx, entry).await?;
        self.after(ctx)
    }
}
