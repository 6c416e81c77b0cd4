use thiserror::Error;

/// Audit and event delivery errors
#[derive(Error, Debug)]
pub enum AuditError {
    /// The sink or bus rejected the record
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// The queue worker has stopped; nothing can be enqueued
    #[error("Audit queue closed")]
    QueueClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AuditResult<T> = std::result::Result<T, AuditError>;
