//! API Module
//!
//! REST server exposing the registry chains, and the REST transport that
//! lets a client chain reach a remote registry.

pub mod client;
pub mod rest;
pub mod server;

pub use client::*;
pub use rest::*;
pub use server::*;

/// Prefix of headers carried as call metadata
pub const METADATA_HEADER_PREFIX: &str = "x-registry-";

/// Scheme prefix of the authorization header
pub const BEARER_PREFIX: &str = "Bearer ";

/// Check whether a metadata key crosses the wire
pub fn is_metadata_key(key: &str) -> bool {
    key.len() > METADATA_HEADER_PREFIX.len()
        && key
            .get(..METADATA_HEADER_PREFIX.len())
            .map_or(false, |prefix| prefix.eq_ignore_ascii_case(METADATA_HEADER_PREFIX))
}
