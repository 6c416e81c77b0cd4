//! Action handlers

use action_kernel_registry::{ActionContract, RegistryError};
use action_kernel_storage::StorageError;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use thiserror::Error;

use crate::sandbox::SandboxContext;

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("Capability not granted: {0}")]
    CapabilityUnavailable(&'static str),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// Implementation of one action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Contract used when no active registry record exists for the tenant
    fn contract(&self) -> Option<ActionContract>;

    /// Source text of the handler, scanned before invocation when present
    fn source(&self) -> Option<&str> {
        None
    }

    async fn handle(&self, ctx: SandboxContext, input: Value) -> HandlerResult;
}

/// Handler backed by an async closure
pub struct FnHandler<F> {
    contract: Option<ActionContract>,
    source: Option<String>,
    func: F,
}

impl<F> FnHandler<F> {
    /// Declare source text for the static scan
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Wrap an async closure as an [`ActionHandler`]
pub fn handler_fn<F, Fut>(contract: Option<ActionContract>, func: F) -> FnHandler<F>
where
    F: Fn(SandboxContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    FnHandler {
        contract,
        source: None,
        func,
    }
}

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(SandboxContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn contract(&self) -> Option<ActionContract> {
        self.contract.clone()
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    async fn handle(&self, ctx: SandboxContext, input: Value) -> HandlerResult {
        (self.func)(ctx, input).await
    }
}
