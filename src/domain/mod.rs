//! Domain layer - registry entry types and port definitions
//!
//! Defines the entries the registry stores, the query template they are
//! matched against and the per-call context every chain stage receives.

pub mod context;
pub mod entries;
pub mod ports;

pub use context::*;
pub use entries::*;
pub use ports::*;
