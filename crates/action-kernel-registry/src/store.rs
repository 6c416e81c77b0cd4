//! Backing stores for contract records, data contracts and links

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{RegistryError, RegistryResult};
use crate::model::{ActionDataContractLink, ContractRecord, ContractStatus, ContractType, DataContract};

/// Durable storage behind the registry
///
/// Every lookup is keyed by an exact tenant scope (`None` = global).
#[async_trait]
pub trait ContractStore: Send + Sync {
    fn name(&self) -> &str;

    /// The record with exactly this (type, name, version)
    async fn find(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
        version: u32,
    ) -> RegistryResult<Option<ContractRecord>>;

    /// Highest-versioned active record
    async fn latest_active(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
    ) -> RegistryResult<Option<ContractRecord>>;

    /// Insert or replace the record keyed by its (type, name, version)
    async fn upsert(&self, record: &ContractRecord) -> RegistryResult<()>;

    /// Set the status of one version; false when it does not exist
    async fn update_status(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
        version: u32,
        status: ContractStatus,
    ) -> RegistryResult<bool>;

    /// All records of a type, ordered by name then version
    async fn list(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
    ) -> RegistryResult<Vec<ContractRecord>>;

    async fn data_contract(&self, tenant_id: Option<&str>, id: &str) -> RegistryResult<Option<DataContract>>;

    async fn put_data_contract(&self, tenant_id: Option<&str>, contract: &DataContract) -> RegistryResult<()>;

    async fn links_for_action(
        &self,
        tenant_id: Option<&str>,
        action_id: &str,
    ) -> RegistryResult<Vec<ActionDataContractLink>>;

    /// Add a link; an identical link is stored once
    async fn put_link(&self, tenant_id: Option<&str>, link: &ActionDataContractLink) -> RegistryResult<()>;
}

type RecordKey = (Option<String>, ContractType, String, u32);

/// In-memory store for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryContractStore {
    records: RwLock<HashMap<RecordKey, ContractRecord>>,
    data_contracts: RwLock<HashMap<(Option<String>, String), DataContract>>,
    links: RwLock<HashMap<Option<String>, Vec<ActionDataContractLink>>>,
}

impl MemoryContractStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(tenant_id: Option<&str>, contract_type: ContractType, name: &str, version: u32) -> RecordKey {
        (tenant_id.map(str::to_string), contract_type, name.to_string(), version)
    }
}

fn poisoned() -> RegistryError {
    RegistryError::StorageUnavailable("memory store lock poisoned".into())
}

#[async_trait]
impl ContractStore for MemoryContractStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
        version: u32,
    ) -> RegistryResult<Option<ContractRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(&Self::key(tenant_id, contract_type, name, version)).cloned())
    }

    async fn latest_active(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
    ) -> RegistryResult<Option<ContractRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records
            .values()
            .filter(|r| {
                r.tenant_id.as_deref() == tenant_id
                    && r.contract_type == contract_type
                    && r.name == name
                    && r.is_active()
            })
            .max_by_key(|r| r.version)
            .cloned())
    }

    async fn upsert(&self, record: &ContractRecord) -> RegistryResult<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(
            Self::key(record.tenant_id.as_deref(), record.contract_type, &record.name, record.version),
            record.clone(),
        );
        Ok(())
    }

    async fn update_status(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
        version: u32,
        status: ContractStatus,
    ) -> RegistryResult<bool> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        match records.get_mut(&Self::key(tenant_id, contract_type, name, version)) {
            Some(record) => {
                record.status = status;
                record.updated_at = chrono::Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
    ) -> RegistryResult<Vec<ContractRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut out: Vec<ContractRecord> = records
            .values()
            .filter(|r| r.tenant_id.as_deref() == tenant_id && r.contract_type == contract_type)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.version.cmp(&b.version)));
        Ok(out)
    }

    async fn data_contract(&self, tenant_id: Option<&str>, id: &str) -> RegistryResult<Option<DataContract>> {
        let contracts = self.data_contracts.read().map_err(|_| poisoned())?;
        Ok(contracts
            .get(&(tenant_id.map(str::to_string), id.to_string()))
            .cloned())
    }

    async fn put_data_contract(&self, tenant_id: Option<&str>, contract: &DataContract) -> RegistryResult<()> {
        let mut contracts = self.data_contracts.write().map_err(|_| poisoned())?;
        contracts.insert((tenant_id.map(str::to_string), contract.id.clone()), contract.clone());
        Ok(())
    }

    async fn links_for_action(
        &self,
        tenant_id: Option<&str>,
        action_id: &str,
    ) -> RegistryResult<Vec<ActionDataContractLink>> {
        let links = self.links.read().map_err(|_| poisoned())?;
        Ok(links
            .get(&tenant_id.map(str::to_string))
            .map(|l| l.iter().filter(|l| l.action_id == action_id).cloned().collect())
            .unwrap_or_default())
    }

    async fn put_link(&self, tenant_id: Option<&str>, link: &ActionDataContractLink) -> RegistryResult<()> {
        let mut links = self.links.write().map_err(|_| poisoned())?;
        let scope = links.entry(tenant_id.map(str::to_string)).or_default();
        if !scope.contains(link) {
            scope.push(link.clone());
        }
        Ok(())
    }
}
