//! Action dispatch for the action contract kernel
//!
//! A [`Dispatcher`] takes an action id, a raw JSON input and a caller
//! identity, and drives the call through contract resolution, policy, input
//! validation, sandboxed execution and output validation. Handlers are found
//! in a static [`EngineRegistry`] built at startup.
//!
//! ```no_run
//! use action_kernel_dispatch::{handler_fn, Dispatcher, Engine, EngineRegistry, KernelContext};
//! use action_kernel_policy::CallerIdentity;
//! use action_kernel_registry::{ActionContract, ActionKind, ContractRegistry};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engines = EngineRegistry::new().with_engine(Engine::new("demo").handler(
//!     "demo.echo",
//!     handler_fn(
//!         Some(ActionContract::new("demo.echo", 1, ActionKind::Query)),
//!         |_ctx, input| async move { Ok(input) },
//!     ),
//! ))?;
//! let context = KernelContext::new(Arc::new(ContractRegistry::reduced()), engines);
//! let dispatcher = Dispatcher::new(Arc::new(context));
//!
//! let caller = CallerIdentity::new(None, "alice").with_permissions(["execute_action"]);
//! let envelope = dispatcher.dispatch("demo.echo", json!({"hello": "world"}), &caller).await;
//! assert!(envelope.success);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod sandbox;
pub mod state;

pub use action::ActionId;
pub use context::KernelContext;
pub use dispatcher::Dispatcher;
pub use engine::{Engine, EngineRegistry};
pub use envelope::{Envelope, EnvelopeMeta, ErrorInfo};
pub use error::{KernelError, KernelResult, ValidationStage};
pub use handler::{handler_fn, ActionHandler, FnHandler, HandlerError, HandlerResult};
pub use sandbox::{Capabilities, FrozenValue, Sandbox, SandboxContext, SandboxOutcome, SourceScanner};
pub use state::DispatchState;
