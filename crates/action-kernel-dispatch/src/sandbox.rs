//! Handler isolation
//!
//! Handlers run against an immutable [`SandboxContext`] that only exposes
//! the capabilities granted at startup. Declared handler source is scanned
//! before the first invocation, panics are caught, and results are frozen
//! behind an `Arc` before anyone else sees them.

use action_kernel_audit::AuditQueue;
use action_kernel_registry::ContractRegistry;
use action_kernel_storage::{CacheTier, StorageExecutor};
use futures::FutureExt;
use regex::Regex;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::handler::{ActionHandler, HandlerError};

/// Shared handles a handler may use
#[derive(Clone, Default)]
pub struct Capabilities {
    storage: Option<Arc<dyn StorageExecutor>>,
    cache: Option<Arc<dyn CacheTier>>,
    registry: Option<Arc<ContractRegistry>>,
    events: Option<AuditQueue>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageExecutor>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheTier>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_registry(mut self, registry: Arc<ContractRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_events(mut self, events: AuditQueue) -> Self {
        self.events = Some(events);
        self
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("storage", &self.storage.is_some())
            .field("cache", &self.cache.is_some())
            .field("registry", &self.registry.is_some())
            .field("events", &self.events.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct Snapshot {
    tenant_id: Option<String>,
    actor_id: String,
    action_id: String,
    request_id: String,
    approval: Option<String>,
    capabilities: Capabilities,
}

/// Read-only view of the call handed to a handler
///
/// Cloning shares the same snapshot.
#[derive(Debug, Clone)]
pub struct SandboxContext {
    inner: Arc<Snapshot>,
}

impl SandboxContext {
    pub fn new(
        tenant_id: Option<&str>,
        actor_id: &str,
        action_id: &str,
        request_id: &str,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            inner: Arc::new(Snapshot {
                tenant_id: tenant_id.map(str::to_string),
                actor_id: actor_id.to_string(),
                action_id: action_id.to_string(),
                request_id: request_id.to_string(),
                approval: None,
                capabilities,
            }),
        }
    }

    pub(crate) fn with_approval(self, approval: Option<String>) -> Self {
        let snapshot = match Arc::try_unwrap(self.inner) {
            Ok(snapshot) => snapshot,
            Err(shared) => Snapshot {
                tenant_id: shared.tenant_id.clone(),
                actor_id: shared.actor_id.clone(),
                action_id: shared.action_id.clone(),
                request_id: shared.request_id.clone(),
                approval: shared.approval.clone(),
                capabilities: shared.capabilities.clone(),
            },
        };
        Self {
            inner: Arc::new(Snapshot { approval, ..snapshot }),
        }
    }

    pub fn tenant(&self) -> Option<&str> {
        self.inner.tenant_id.as_deref()
    }

    pub fn actor(&self) -> &str {
        &self.inner.actor_id
    }

    pub fn action_id(&self) -> &str {
        &self.inner.action_id
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// Approval id or auto-approval sentinel for governed calls
    pub fn approval(&self) -> Option<&str> {
        self.inner.approval.as_deref()
    }

    pub fn storage(&self) -> Result<&dyn StorageExecutor, HandlerError> {
        self.inner
            .capabilities
            .storage
            .as_deref()
            .ok_or(HandlerError::CapabilityUnavailable("storage"))
    }

    pub fn cache(&self) -> Result<&dyn CacheTier, HandlerError> {
        self.inner
            .capabilities
            .cache
            .as_deref()
            .ok_or(HandlerError::CapabilityUnavailable("cache"))
    }

    pub fn registry(&self) -> Result<&ContractRegistry, HandlerError> {
        self.inner
            .capabilities
            .registry
            .as_deref()
            .ok_or(HandlerError::CapabilityUnavailable("registry"))
    }

    /// Structured log line attributed to the calling action
    pub fn log(&self, message: &str, fields: &Value) {
        tracing::info!(
            action_id = %self.inner.action_id,
            request_id = %self.inner.request_id,
            fields = %fields,
            "{}",
            message
        );
    }

    /// Publish an event through the background queue
    pub async fn emit(&self, name: &str, payload: Value) -> Result<(), HandlerError> {
        let events = self
            .inner
            .capabilities
            .events
            .as_ref()
            .ok_or(HandlerError::CapabilityUnavailable("events"))?;
        events
            .publish(name, payload)
            .await
            .map_err(|e| HandlerError::failed(e.to_string()))
    }
}

/// Frozen handler result
pub type FrozenValue = Arc<Value>;

/// Handler result after isolation: a frozen value or one error message
pub type SandboxOutcome = Result<FrozenValue, String>;

/// Static scan of handler source text
#[derive(Debug)]
pub struct SourceScanner {
    rules: Vec<(&'static str, Regex)>,
}

impl SourceScanner {
    pub fn new() -> Self {
        let patterns: [(&'static str, &'static str); 9] = [
            ("dynamic_eval", r"\beval\s*\("),
            ("dynamic_function", r"\bnew\s+Function\s*\("),
            ("process_spawn", r"\bchild_process\b|\b(spawn|execSync|execFile|fork)\s*\("),
            ("process_command", r"\bstd::process::Command\b|\bCommand::new\s*\("),
            ("process_escape", r"\bprocess\.(binding|dlopen|exit|kill)\b"),
            ("module_loading", r#"\brequire\s*\(\s*['"](fs|net|http|https|dgram|vm|worker_threads|child_process)['"]\s*\)"#),
            ("filesystem_escape", r"\bstd::fs::|\bfs\.(readFile|writeFile|unlink|rm)\w*\s*\("),
            ("network_escape", r"\bstd::net::|\bTcpStream::connect\b|\bfetch\s*\("),
            ("global_escape", r"\b(globalThis|__proto__|constructor\.constructor)\b"),
        ];

        let rules = patterns
            .into_iter()
            .filter_map(|(name, pattern)| match Regex::new(pattern) {
                Ok(re) => Some((name, re)),
                Err(e) => {
                    tracing::error!(rule = name, error = %e, "Deny-list rule failed to compile");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Names of the deny-list rules the source matches
    pub fn scan(&self, source: &str) -> Vec<String> {
        self.rules
            .iter()
            .filter(|(_, re)| re.is_match(source))
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

impl Default for SourceScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs handlers in isolation
#[derive(Debug, Default)]
pub struct Sandbox {
    scanner: SourceScanner,
}

impl Sandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deny-list matches in the handler's declared source, if any
    pub fn inspect(&self, handler: &dyn ActionHandler) -> Vec<String> {
        handler.source().map(|s| self.scanner.scan(s)).unwrap_or_default()
    }

    /// Invoke the handler, folding errors and panics into one outcome
    pub async fn run(
        &self,
        handler: Arc<dyn ActionHandler>,
        context: SandboxContext,
        input: Value,
    ) -> SandboxOutcome {
        let invocation = AssertUnwindSafe(handler.handle(context, input)).catch_unwind();
        match invocation.await {
            Ok(Ok(value)) => Ok(Arc::new(value)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
