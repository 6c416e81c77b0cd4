//! Validator cache keyed by contract id and version
//!
//! Contracts are immutable once active, so a compiled validator never goes
//! stale for its (id, version). Entries are only dropped explicitly.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::SchemaResult;
use crate::validator::Validator;

/// Which side of a contract a validator checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaSide {
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    contract_id: String,
    version: u32,
    side: SchemaSide,
}

/// Shared cache of compiled validators
#[derive(Debug, Default)]
pub struct ValidatorCache {
    entries: RwLock<HashMap<CacheKey, Arc<Validator>>>,
}

impl ValidatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached validator or compile and cache it
    ///
    /// An absent descriptor yields a pass-through validator. Compile errors
    /// are returned and nothing is cached.
    pub fn get_or_compile(
        &self,
        contract_id: &str,
        version: u32,
        side: SchemaSide,
        descriptor: Option<&Value>,
    ) -> SchemaResult<Arc<Validator>> {
        let key = CacheKey {
            contract_id: contract_id.to_string(),
            version,
            side,
        };

        if let Some(hit) = self.entries.read().ok().and_then(|e| e.get(&key).cloned()) {
            return Ok(hit);
        }

        let validator = Arc::new(match descriptor {
            Some(d) => Validator::from_descriptor(d)?,
            None => Validator::pass_through(),
        });
        tracing::debug!(contract_id = contract_id, version = version, side = ?side, "compiled validator");

        if let Ok(mut entries) = self.entries.write() {
            let entry = entries.entry(key).or_insert_with(|| Arc::clone(&validator));
            return Ok(Arc::clone(entry));
        }
        Ok(validator)
    }

    /// Drop every cached validator of a contract
    pub fn invalidate(&self, contract_id: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|k, _| k.contract_id != contract_id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
