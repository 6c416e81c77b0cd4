//! Error types for storage collaborators

use thiserror::Error;

/// Errors raised by storage executors and cache tiers
#[derive(Error, Debug)]
pub enum StorageError {
    /// No durable store is configured, or it cannot be reached
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The statement was rejected or failed during execution
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Cache tier failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Row payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Create a query failure
    pub fn query_failed(msg: impl Into<String>) -> Self {
        StorageError::QueryFailed(msg.into())
    }

    /// Create an unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        StorageError::Unavailable(msg.into())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;
