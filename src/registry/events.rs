//! Registry Events
//!
//! Events emitted by the entry store for watchers to react to entry
//! lifecycle changes.

use crate::domain::RegistryEntry;
use serde::{Deserialize, Serialize};

/// What happened to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The entry was registered for the first time (or is part of a snapshot)
    Added,
    /// An existing entry was registered again
    Updated,
    /// The entry was unregistered or expired
    Deleted,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Added => write!(f, "added"),
            EventKind::Updated => write!(f, "updated"),
            EventKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// A change applied to the store, or a snapshot item of a find
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEvent<E> {
    pub kind: EventKind,
    pub entry: E,
    /// Store revision after the change; snapshot items carry the snapshot revision
    pub revision: u64,
}

impl<E: RegistryEntry> RegistryEvent<E> {
    pub fn added(entry: E, revision: u64) -> Self {
        Self {
            kind: EventKind::Added,
            entry,
            revision,
        }
    }

    pub fn updated(entry: E, revision: u64) -> Self {
        Self {
            kind: EventKind::Updated,
            entry,
            revision,
        }
    }

    pub fn deleted(entry: E, revision: u64) -> Self {
        Self {
            kind: EventKind::Deleted,
            entry,
            revision,
        }
    }

    /// Name of the entry this event is about
    pub fn name(&self) -> &str {
        self.entry.name()
    }

    pub fn is_deleted(&self) -> bool {
        self.kind == EventKind::Deleted
    }
}
