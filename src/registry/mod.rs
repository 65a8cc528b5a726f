//! Registry Module
//!
//! In-memory entry store with a deadline index, a background expiration
//! sweeper, snapshot and watch queries, and the lifecycle owner tying them
//! together.

pub mod events;
pub mod expire;
pub mod memory;
pub mod query;
pub mod store;

pub use events::*;
pub use expire::*;
pub use memory::*;
pub use query::*;
pub use store::*;
