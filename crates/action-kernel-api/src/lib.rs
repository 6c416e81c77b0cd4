//! HTTP surface and operator tooling for the action contract kernel
//!
//! ```rust,no_run
//! use action_kernel_api::{Collaborators, Kernel, KernelConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = KernelConfig::default();
//! let kernel = Kernel::build(&config, Collaborators::in_memory())?;
//! let listener = tokio::net::TcpListener::bind(config.bind_addr()?).await?;
//! axum::serve(listener, kernel.router()).await?;
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod logging;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::{ConfigOverrides, KernelConfig, LogFormat};
pub use error::{ServerError, ServerResult};
pub use extract::CallerExtractor;
pub use metrics::MetricsRegistry;
pub use routes::{create_router, envelope_status, ApiError, ApiResponse};
pub use state::{AppState, Collaborators, Kernel};
