//! Static domain -> engine -> handler registration table

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::action::ActionId;
use crate::error::{KernelError, KernelResult};
use crate::handler::ActionHandler;

/// All handlers of one domain, keyed by full action id
pub struct Engine {
    domain: String,
    handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
}

impl Engine {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            handlers: BTreeMap::new(),
        }
    }

    /// Register a handler under its action id
    pub fn handler(mut self, action_id: impl Into<String>, handler: impl ActionHandler + 'static) -> Self {
        self.handlers.insert(action_id.into(), Arc::new(handler));
        self
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Registration table built once at startup
#[derive(Default)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Engine>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an engine; each domain is registered once and every action id
    /// must belong to the engine's domain
    pub fn register(&mut self, engine: Engine) -> KernelResult<()> {
        if self.engines.contains_key(&engine.domain) {
            return Err(KernelError::ContractInvalid(format!(
                "engine for domain '{}' registered twice",
                engine.domain
            )));
        }
        for action_id in engine.handlers.keys() {
            let id = ActionId::parse(action_id)?;
            if id.domain != engine.domain {
                return Err(KernelError::ContractInvalid(format!(
                    "action '{}' does not belong to domain '{}'",
                    action_id, engine.domain
                )));
            }
        }

        tracing::debug!(
            domain = %engine.domain,
            actions = engine.handlers.len(),
            "Engine registered"
        );
        self.engines.insert(engine.domain.clone(), engine);
        Ok(())
    }

    pub fn with_engine(mut self, engine: Engine) -> KernelResult<Self> {
        self.register(engine)?;
        Ok(self)
    }

    pub fn resolve(&self, id: &ActionId) -> Option<Arc<dyn ActionHandler>> {
        self.engines
            .get(&id.domain)
            .and_then(|engine| engine.handlers.get(&id.to_string()))
            .cloned()
    }

    /// Every registered action id, sorted
    pub fn actions(&self) -> Vec<String> {
        self.engines
            .values()
            .flat_map(|e| e.actions().map(str::to_string))
            .collect()
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.engines.keys().map(String::as_str)
    }
}
