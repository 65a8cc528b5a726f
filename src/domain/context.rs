//! Call Context
//!
//! State that travels with a single call through the chain: the session the
//! Begin stage attaches, the call path, the out-of-band metadata that crosses
//! process boundaries, the caller's identity token and its cancellation.

use crate::domain::entries::Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Out-of-band key/value side channel of a call (header-like)
pub type Metadata = BTreeMap<String, String>;

// =============================================================================
// Session ID
// =============================================================================

/// Identifier of a logical registration session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a fresh random session id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Call Context
// =============================================================================

/// Per-call context passed to every stage
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Session attached by the Begin stage
    pub session: Option<SessionId>,
    /// Call path, restored from metadata on the server side
    pub path: Option<Path>,
    /// Side channel carried over the wire
    pub metadata: Metadata,
    /// Opaque identity token supplied by the transport
    pub token: Option<String>,
    /// Caller-initiated cancellation
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            session: None,
            path: None,
            metadata: Metadata::new(),
            token: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Context cancelled together with `cancel`
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::new()
        }
    }

    pub fn with_path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Copy of this context for a call issued on its behalf later on.
    ///
    /// The copy keeps session, path, metadata and token but gets a
    /// cancellation token of its own derived from `parent`.
    pub fn detached(&self, parent: &CancellationToken) -> Self {
        Self {
            session: self.session.clone(),
            path: self.path.clone(),
            metadata: self.metadata.clone(),
            token: self.token.clone(),
            cancel: parent.child_token(),
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}
