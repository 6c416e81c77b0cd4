//! Versioned, tenant-scoped contract registry
//!
//! Unversioned lookups go through the cache tier first and fall back to the
//! store; explicit versions always hit the store. Writes invalidate the
//! cache key of the (tenant, type, name) they touch, so a cached entry is
//! stale for at most one TTL when another process writes.

use action_kernel_storage::{CacheTier, MemoryCache};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RegistryError, RegistryResult};
use crate::model::{
    ActionContract, ActionDataContractLink, ContractRecord, ContractStatus, ContractType,
    DataContract,
};
use crate::store::ContractStore;

/// Default TTL for cached unversioned lookups
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// What `register` did with a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    /// A draft with the same (id, version) was replaced
    Replaced,
    /// Identical content was already registered
    Unchanged,
}

/// Contract registry over an optional backing store
///
/// Without a store the registry runs in reduced mode: reads find nothing
/// and writes fail with `StorageUnavailable`.
pub struct ContractRegistry {
    store: Option<Arc<dyn ContractStore>>,
    cache: Arc<dyn CacheTier>,
    ttl: Duration,
}

impl ContractRegistry {
    pub fn new(store: Arc<dyn ContractStore>) -> Self {
        Self {
            store: Some(store),
            cache: Arc::new(MemoryCache::new()),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Registry without a backing store
    pub fn reduced() -> Self {
        Self {
            store: None,
            cache: Arc::new(MemoryCache::new()),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheTier>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn is_reduced(&self) -> bool {
        self.store.is_none()
    }

    /// Cache key for the active record of (tenant, type, name)
    pub fn cache_key(tenant_id: Option<&str>, contract_type: ContractType, name: &str) -> String {
        format!(
            "contract:{}:{}:{}",
            tenant_id.unwrap_or("global"),
            contract_type,
            name
        )
    }

    fn store(&self, operation: &str) -> RegistryResult<&Arc<dyn ContractStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| RegistryError::reduced_mode(operation))
    }

    /// Register a record
    ///
    /// A duplicate (type, name, version) is rejected unless `upsert` is set
    /// or the content hash matches the stored record. Upsert only replaces
    /// drafts; active and deprecated records are immutable.
    pub async fn register(&self, record: ContractRecord, upsert: bool) -> RegistryResult<RegisterOutcome> {
        let store = self.store("contract registration")?;
        record.validate()?;

        let tenant = record.tenant_id.as_deref();
        let existing = store
            .find(tenant, record.contract_type, &record.name, record.version)
            .await?;

        let outcome = match existing {
            Some(existing) if existing.content_hash == record.content_hash => {
                tracing::debug!(
                    name = %record.name,
                    version = record.version,
                    "Identical contract already registered"
                );
                RegisterOutcome::Unchanged
            }
            Some(existing) if !upsert => {
                return Err(RegistryError::DuplicateContract {
                    name: existing.name,
                    version: existing.version,
                });
            }
            Some(existing) if existing.status != ContractStatus::Draft => {
                return Err(RegistryError::ImmutableContract {
                    name: existing.name,
                    version: existing.version,
                    status: existing.status,
                });
            }
            Some(existing) => {
                let replacement = ContractRecord {
                    id: existing.id,
                    created_at: existing.created_at,
                    updated_at: chrono::Utc::now(),
                    ..record.clone()
                };
                store.upsert(&replacement).await?;
                RegisterOutcome::Replaced
            }
            None => {
                store.upsert(&record).await?;
                RegisterOutcome::Created
            }
        };

        self.invalidate(tenant, record.contract_type, &record.name).await;
        tracing::info!(
            tenant = tenant.unwrap_or("global"),
            contract_type = %record.contract_type,
            name = %record.name,
            version = record.version,
            status = %record.status,
            outcome = ?outcome,
            "Contract registered"
        );
        Ok(outcome)
    }

    /// Resolve a record in exactly the given tenant scope
    ///
    /// Without a version this is the highest active version.
    pub async fn resolve(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
        version: Option<u32>,
    ) -> RegistryResult<Option<ContractRecord>> {
        let Some(store) = self.store.as_ref() else {
            return Ok(None);
        };

        if let Some(version) = version {
            return store.find(tenant_id, contract_type, name, version).await;
        }

        let key = Self::cache_key(tenant_id, contract_type, name);
        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_value::<ContractRecord>(cached) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(key = %key, error = %e, "Cache read failed, using store"),
        }

        let record = store.latest_active(tenant_id, contract_type, name).await?;
        if let Some(record) = &record {
            match serde_json::to_value(record) {
                Ok(value) => {
                    if let Err(e) = self.cache.set(&key, value, self.ttl).await {
                        tracing::warn!(key = %key, error = %e, "Cache write failed");
                    }
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "Record not cacheable"),
            }
        }
        Ok(record)
    }

    /// Resolve and parse the active action contract for `action_id`
    pub async fn resolve_action(
        &self,
        tenant_id: Option<&str>,
        action_id: &str,
    ) -> RegistryResult<Option<ActionContract>> {
        self.resolve(tenant_id, ContractType::Action, action_id, None)
            .await?
            .map(|record| ActionContract::from_record(&record))
            .transpose()
    }

    /// draft -> active
    pub async fn activate(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
        version: u32,
    ) -> RegistryResult<()> {
        self.transition(tenant_id, contract_type, name, version, ContractStatus::Active)
            .await
    }

    /// active (or draft) -> deprecated
    pub async fn deprecate(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
        version: u32,
    ) -> RegistryResult<()> {
        self.transition(tenant_id, contract_type, name, version, ContractStatus::Deprecated)
            .await
    }

    async fn transition(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
        version: u32,
        next: ContractStatus,
    ) -> RegistryResult<()> {
        let store = self.store("status change")?;
        let current = store
            .find(tenant_id, contract_type, name, version)
            .await?
            .ok_or_else(|| RegistryError::not_found(contract_type, name, Some(version)))?;

        if !current.status.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        if !store
            .update_status(tenant_id, contract_type, name, version, next)
            .await?
        {
            return Err(RegistryError::not_found(contract_type, name, Some(version)));
        }
        self.invalidate(tenant_id, contract_type, name).await;

        tracing::info!(
            tenant = tenant_id.unwrap_or("global"),
            name = name,
            version = version,
            from = %current.status,
            to = %next,
            "Contract status changed"
        );
        Ok(())
    }

    /// Every record of a type in exactly this scope
    pub async fn list(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
    ) -> RegistryResult<Vec<ContractRecord>> {
        match self.store.as_ref() {
            Some(store) => store.list(tenant_id, contract_type).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn data_contract(&self, tenant_id: Option<&str>, id: &str) -> RegistryResult<Option<DataContract>> {
        match self.store.as_ref() {
            Some(store) => store.data_contract(tenant_id, id).await,
            None => Ok(None),
        }
    }

    pub async fn register_data_contract(
        &self,
        tenant_id: Option<&str>,
        contract: &DataContract,
    ) -> RegistryResult<()> {
        let store = self.store("data contract registration")?;
        if contract.id.trim().is_empty() {
            return Err(RegistryError::invalid("data contract id must not be empty"));
        }
        store.put_data_contract(tenant_id, contract).await
    }

    pub async fn links_for_action(
        &self,
        tenant_id: Option<&str>,
        action_id: &str,
    ) -> RegistryResult<Vec<ActionDataContractLink>> {
        match self.store.as_ref() {
            Some(store) => store.links_for_action(tenant_id, action_id).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn link_data_contract(
        &self,
        tenant_id: Option<&str>,
        link: &ActionDataContractLink,
    ) -> RegistryResult<()> {
        let store = self.store("data contract linking")?;
        store.put_link(tenant_id, link).await
    }

    async fn invalidate(&self, tenant_id: Option<&str>, contract_type: ContractType, name: &str) {
        let key = Self::cache_key(tenant_id, contract_type, name);
        if let Err(e) = self.cache.del(&key).await {
            tracing::warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }
}

impl std::fmt::Debug for ContractRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractRegistry")
            .field("store", &self.store.as_ref().map(|s| s.name().to_string()))
            .field("ttl", &self.ttl)
            .finish()
    }
}
