//! Startup-built kernel context

use action_kernel_audit::AuditQueue;
use action_kernel_policy::PolicyEvaluator;
use action_kernel_registry::ContractRegistry;
use action_kernel_schema::ValidatorCache;
use action_kernel_storage::{CacheTier, StorageExecutor};
use std::sync::Arc;

use crate::engine::EngineRegistry;
use crate::sandbox::Capabilities;

/// Everything a dispatcher needs, assembled once at startup
pub struct KernelContext {
    registry: Arc<ContractRegistry>,
    engines: EngineRegistry,
    policy: PolicyEvaluator,
    validators: ValidatorCache,
    audit: Option<AuditQueue>,
    storage: Option<Arc<dyn StorageExecutor>>,
    cache: Option<Arc<dyn CacheTier>>,
    dev_diagnostics: bool,
}

impl KernelContext {
    /// Context with a default policy evaluator over `registry`
    pub fn new(registry: Arc<ContractRegistry>, engines: EngineRegistry) -> Self {
        Self {
            policy: PolicyEvaluator::new(Arc::clone(&registry)),
            registry,
            engines,
            validators: ValidatorCache::new(),
            audit: None,
            storage: None,
            cache: None,
            dev_diagnostics: false,
        }
    }

    pub fn with_policy(mut self, policy: PolicyEvaluator) -> Self {
        self.policy = policy;
        self
    }

    /// Queue handed to handlers for event emission
    pub fn with_audit(mut self, audit: AuditQueue) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageExecutor>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheTier>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Include internal diagnostics in error details
    pub fn with_dev_diagnostics(mut self, enabled: bool) -> Self {
        self.dev_diagnostics = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<ContractRegistry> {
        &self.registry
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    pub fn policy(&self) -> &PolicyEvaluator {
        &self.policy
    }

    pub fn validators(&self) -> &ValidatorCache {
        &self.validators
    }

    pub fn audit(&self) -> Option<&AuditQueue> {
        self.audit.as_ref()
    }

    pub fn dev_diagnostics(&self) -> bool {
        self.dev_diagnostics
    }

    /// Capability handles exposed to sandboxed handlers
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::new().with_registry(Arc::clone(&self.registry));
        if let Some(storage) = &self.storage {
            caps = caps.with_storage(Arc::clone(storage));
        }
        if let Some(cache) = &self.cache {
            caps = caps.with_cache(Arc::clone(cache));
        }
        if let Some(audit) = &self.audit {
            caps = caps.with_events(audit.clone());
        }
        caps
    }
}

impl std::fmt::Debug for KernelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelContext")
            .field("actions", &self.engines.actions())
            .field("reduced_registry", &self.registry.is_reduced())
            .field("dev_diagnostics", &self.dev_diagnostics)
            .finish()
    }
}
