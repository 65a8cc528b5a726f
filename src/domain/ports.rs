//! Domain Ports - traits every registry entry kind implements
//!
//! The store, the query engine and the chain stages are generic over
//! [`RegistryEntry`], so network services and endpoints share one engine.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Entry Kind
// =============================================================================

/// Kinds of entries held by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Network service
    Ns,
    /// Network service endpoint
    Nse,
}

impl EntryKind {
    /// Short label used in routes, metrics and generated names
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Ns => "ns",
            EntryKind::Nse => "nse",
        }
    }

    /// Logical service name reported by health checks
    pub fn service_name(&self) -> &'static str {
        match self {
            EntryKind::Ns => "registry.NetworkServiceRegistry",
            EntryKind::Nse => "registry.NetworkServiceEndpointRegistry",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Registry Entry (Port)
// =============================================================================

/// An entry that can be registered, found and unregistered
pub trait RegistryEntry:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Kind of this entry
    const KIND: EntryKind;

    /// Whether the store enforces a deadline on entries of this kind
    const EXPIRES: bool;

    /// Unique name of the entry
    fn name(&self) -> &str;

    /// Replace the name (used when the store generates one)
    fn set_name(&mut self, name: String);

    /// Absolute expiration deadline, if any
    fn expiration_time(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Set the expiration deadline; kinds without expiration ignore it
    fn set_expiration_time(&mut self, _expiration_time: Option<DateTime<Utc>>) {}

    /// Name assigned to an entry registered without one.
    ///
    /// `None` means a name is mandatory for this kind.
    fn generate_name() -> Option<String> {
        None
    }

    /// Check whether this entry matches a query template.
    ///
    /// Filter clauses are inclusive: an entry matches when any supplied clause
    /// matches, and a template without clauses matches everything.
    fn matches(&self, template: &Self) -> bool;
}

// =============================================================================
// Query
// =============================================================================

/// A find request: a template entry plus the watch flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query<E> {
    /// Template the stored entries are matched against
    pub entry: E,
    /// Keep the result stream open and emit incremental changes
    #[serde(default)]
    pub watch: bool,
}

impl<E: RegistryEntry> Query<E> {
    /// One-shot query
    pub fn new(entry: E) -> Self {
        Self {
            entry,
            watch: false,
        }
    }

    /// Continuous query
    pub fn watch(entry: E) -> Self {
        Self { entry, watch: true }
    }
}
