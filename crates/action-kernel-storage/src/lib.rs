//! Storage collaborators for the action contract kernel
//!
//! The kernel never persists data itself. Everything durable goes through
//! two injected collaborators defined here:
//!
//! - [`StorageExecutor`]: parameterized statement execution returning rows
//!   plus a row count.
//! - [`CacheTier`]: an optional key/value cache with per-entry TTL.
//!
//! In-memory implementations ([`MemoryExecutor`], [`MemoryCache`]) back the
//! test suites and local runs of the API server.

pub mod cache;
pub mod error;
pub mod executor;

pub use cache::{CacheTier, MemoryCache, NoopCache};
pub use error::{StorageError, StorageResult};
pub use executor::{MemoryExecutor, QueryResult, Row, StorageExecutor};
