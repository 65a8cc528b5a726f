//! Registry Entry Types
//!
//! Network services, network service endpoints and the path carried alongside
//! calls for multi-hop tracing.

use crate::domain::ports::{EntryKind, RegistryEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Network Service
// =============================================================================

/// A named network service. Services never expire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkService {
    /// Unique service name
    #[serde(default)]
    pub name: String,
    /// Opaque payload (e.g. matching rules), stored verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl NetworkService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

impl RegistryEntry for NetworkService {
    const KIND: EntryKind = EntryKind::Ns;
    const EXPIRES: bool = false;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn matches(&self, template: &Self) -> bool {
        template.name.is_empty() || template.name == self.name
    }
}

// =============================================================================
// Network Service Endpoint
// =============================================================================

/// An instance offering one or more network services at a URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkServiceEndpoint {
    /// Unique endpoint name; generated by the store when empty
    #[serde(default)]
    pub name: String,
    /// Transport address
    #[serde(default)]
    pub url: String,
    /// Names of the services this endpoint implements
    #[serde(default)]
    pub network_service_names: BTreeSet<String>,
    /// Opaque labels, stored verbatim
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Absolute deadline; absent means the registry default TTL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
}

impl NetworkServiceEndpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.network_service_names.insert(service.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_expiration_time(mut self, expiration_time: DateTime<Utc>) -> Self {
        self.expiration_time = Some(expiration_time);
        self
    }

    /// Template matching every endpoint that implements `service`
    pub fn for_service(service: impl Into<String>) -> Self {
        Self::default().with_service(service)
    }
}

impl RegistryEntry for NetworkServiceEndpoint {
    const KIND: EntryKind = EntryKind::Nse;
    const EXPIRES: bool = true;

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn expiration_time(&self) -> Option<DateTime<Utc>> {
        self.expiration_time
    }

    fn set_expiration_time(&mut self, expiration_time: Option<DateTime<Utc>>) {
        self.expiration_time = expiration_time;
    }

    fn generate_name() -> Option<String> {
        Some(format!("nse-{}", uuid::Uuid::new_v4()))
    }

    fn matches(&self, template: &Self) -> bool {
        let by_name = !template.name.is_empty();
        let by_service = !template.network_service_names.is_empty();

        if !by_name && !by_service {
            return true;
        }

        (by_name && template.name == self.name)
            || (by_service
                && !template
                    .network_service_names
                    .is_disjoint(&self.network_service_names))
    }
}

// =============================================================================
// Path
// =============================================================================

/// One hop of a call path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSegment {
    /// Name of the component handling this hop
    pub name: String,
    /// Per-hop identifier
    pub id: String,
    /// Opaque identity token presented at this hop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// When the token stops being valid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

/// Ordered list of hops a call has traversed, with the current position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Path {
    /// Index of the segment for the component currently handling the call
    pub index: usize,
    pub segments: Vec<PathSegment>,
}

impl Path {
    /// Segment at the current index
    pub fn current(&self) -> Option<&PathSegment> {
        self.segments.get(self.index)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
