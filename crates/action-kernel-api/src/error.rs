//! Server-side errors: configuration, bootstrap and telemetry

use action_kernel_dispatch::KernelError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl ServerError {
    pub fn config(msg: impl Into<String>) -> Self {
        ServerError::Config(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ServerError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::config("audit queue size must be positive");
        assert_eq!(err.to_string(), "Configuration error: audit queue size must be positive");

        let err = ServerError::io("/etc/kernel.toml", std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.to_string().starts_with("Failed to read /etc/kernel.toml"));
    }
}
