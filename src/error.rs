//! Error types for the registry
//!
//! Provides structured error types for the entry store, the chain stages and
//! the REST transport.

use thiserror::Error;

/// Unified error type for the registry
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Corrupted call metadata {key}: {reason}")]
    MetadataCorrupted { key: String, reason: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Registry is shutting down")]
    ShuttingDown,

    #[error("Call cancelled")]
    Cancelled,

    #[error("Call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Watch fell behind and was disconnected after skipping {skipped} events")]
    WatchLagged { skipped: u64 },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote call failed with status {status}: {code} - {message}")]
    Remote {
        status: u16,
        code: String,
        message: String,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable reason for this error
    pub fn code(&self) -> &str {
        match self {
            Error::Internal(_) => "internal_error",
            Error::Configuration(_) => "configuration_error",
            Error::Metrics(_) => "metrics_error",
            Error::Validation(_) => "invalid_request",
            Error::MetadataCorrupted { .. } => "metadata_corrupted",
            Error::ShuttingDown => "shutting_down",
            Error::Cancelled => "cancelled",
            Error::Timeout(_) => "timeout",
            Error::WatchLagged { .. } => "watch_lagged",
            Error::Http(_) => "transport_error",
            Error::Remote { code, .. } => code,
            Error::JsonParse(_) => "json_parse_error",
            Error::Io(_) => "io_error",
        }
    }

    /// HTTP status used when this error crosses the REST boundary
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::MetadataCorrupted { .. } | Error::JsonParse(_) => 400,
            Error::ShuttingDown => 503,
            Error::Cancelled => 499,
            Error::Timeout(_) => 504,
            Error::WatchLagged { .. } => 410,
            Error::Http(_) => 502,
            Error::Remote { status, .. } => *status,
            Error::Internal(_) | Error::Configuration(_) | Error::Metrics(_) | Error::Io(_) => 500,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(_) | Error::ShuttingDown | Error::Timeout(_) | Error::WatchLagged { .. } => {
                true
            }
            Error::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if the same call may succeed when issued again unchanged
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Validation(_)
                | Error::MetadataCorrupted { .. }
                | Error::Configuration(_)
                | Error::Cancelled
        )
    }
}

/// Result type alias for the registry
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Validation("empty name".into()).code(), "invalid_request");
        assert_eq!(Error::ShuttingDown.code(), "shutting_down");

        let remote = Error::Remote {
            status: 400,
            code: "invalid_request".into(),
            message: "empty name".into(),
        };
        assert_eq!(remote.code(), "invalid_request");
        assert_eq!(remote.status_code(), 400);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::Remote {
            status: 503,
            code: "shutting_down".into(),
            message: "down".into(),
        };
        assert!(transient.is_transient());
        assert!(transient.is_retryable());

        let invalid = Error::Validation("bad".into());
        assert!(!invalid.is_transient());
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.status_code(), 400);
    }
}
