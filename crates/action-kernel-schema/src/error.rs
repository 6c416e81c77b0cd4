//! Error types for descriptor parsing and compilation

use thiserror::Error;

/// Errors raised while turning a descriptor into a validator
///
/// Validation failures are not errors; they are reported through
/// [`crate::ValidationOutcome::Failure`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The descriptor is structurally malformed
    #[error("Invalid schema descriptor at {path}: {message}")]
    InvalidDescriptor { path: String, message: String },

    /// A `pattern` constraint is not a valid regular expression
    #[error("Invalid pattern at {path}: {message}")]
    InvalidPattern { path: String, message: String },
}

impl SchemaError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaError::InvalidDescriptor {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Descriptor path at which the error was detected
    pub fn path(&self) -> &str {
        match self {
            SchemaError::InvalidDescriptor { path, .. } | SchemaError::InvalidPattern { path, .. } => path,
        }
    }
}

/// Result type alias for schema operations
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
