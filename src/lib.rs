//! Registry Memory - In-Memory Network Service Registry
//!
//! A service-discovery registry holding network services and network service
//! endpoints (NSEs) in memory. Endpoints expire unless refreshed; every call
//! flows through a chain of composable stages before it reaches storage.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── client process ─────────────────────────────┐
//! │  Begin ──► Refresh ──► Metadata(client) ──► RestTransport                │
//! └──────────────────────────────────┬──────────────────────────────────────┘
//!                                    │ HTTP + x-registry-* headers
//! ┌──────────────────────────── registry process ───────────────────────────┐
//! │  REST API ──► Metadata(server) ──► UpdatePath ──► StoreStage             │
//! │                                                        │                 │
//! │              ┌─────────────────────────────────────────┴──────────┐      │
//! │              │  Store<NetworkService>   Store<NetworkServiceEndpoint>    │
//! │              │  (entries + deadline index + revision, one lock)   │      │
//! │              └───────┬─────────────────────────────┬──────────────┘      │
//! │                      │ events                      │ deadlines           │
//! │               Query Engine (find / watch)   Expiration sweeper           │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`]: Entry types, query template and call context
//! - [`registry`]: Entry store, expiration, queries and the registry owner
//! - [`chain`]: Chain pipeline and its stages
//! - [`api`]: REST server and REST transport
//! - [`health`]: Serving status per logical service
//! - [`metrics`]: Prometheus metrics
//! - [`config`]: Registry configuration
//! - [`error`]: Error types and handling

pub mod api;
pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
pub mod health;
pub mod metrics;
pub mod registry;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestClientConfig, RestRouter, RestTransport};

pub use chain::{
    BeginStage, Chain, ChainBuilder, MetadataStage, Next, RefreshConfig, RefreshStage, Stage,
    StoreStage, UpdatePathStage,
};

pub use config::RegistryConfig;

pub use domain::{
    CallContext, EntryKind, Metadata, NetworkService, NetworkServiceEndpoint, Path, PathSegment,
    Query, RegistryEntry, SessionId,
};

pub use error::{Error, Result};

pub use health::{HealthReporter, ServingStatus};

pub use metrics::RegistryMetrics;

pub use registry::{
    collect_entries, EventKind, FindStream, MemoryRegistry, RegistryEvent, Snapshot, Store,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
