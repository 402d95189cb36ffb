//! # Persistence Backends
//!
//! Implementations of the graph source and workflow session collaborators.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{MemoryGraph, MemorySession, MemoryTx};
#[cfg(feature = "postgres")]
pub use postgres::{PgGraphSource, MIGRATOR};
