//! Database module
//!
//! This module provides connections, the driver and cache engine
//! abstractions, connection events and the process-wide registry.

pub mod cache;
pub mod connection;
pub mod driver;
pub mod events;
pub mod memory;
pub mod registry;

// Re-exports
pub use cache::{CacheEngine, CacheOptions, CacheStats, MemoryCache};
pub use connection::{Connection, ConnectionState};
pub use driver::Driver;
pub use events::{ConnectionEvent, EventBus, QueryEvent};
pub use memory::MemoryDriver;
