//! Contract store over the injected storage executor
//!
//! All statements are parameterized; values travel as positional JSON
//! parameters and never through string formatting.

use action_kernel_storage::{Row, StorageExecutor};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::error::{RegistryError, RegistryResult};
use crate::model::{ActionDataContractLink, ContractRecord, ContractStatus, ContractType, DataContract};
use crate::store::ContractStore;

const RECORD_COLUMNS: &str =
    "id, tenant_id, contract_type, name, version, schema, status, content_hash, created_at, updated_at";

const SCOPE_FILTER: &str = "tenant_id IS NOT DISTINCT FROM $1 AND contract_type = $2";

/// [`ContractStore`] issuing SQL through a [`StorageExecutor`]
///
/// Tables: `contract_registry`, `data_contracts`, `action_data_contract_links`.
pub struct SqlContractStore {
    executor: Arc<dyn StorageExecutor>,
}

impl SqlContractStore {
    pub fn new(executor: Arc<dyn StorageExecutor>) -> Self {
        Self { executor }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        statement: &str,
        params: &[Value],
        json_columns: &[&str],
    ) -> RegistryResult<Vec<T>> {
        let result = self.executor.query(statement, params).await?;
        result
            .rows
            .into_iter()
            .map(|row| decode_row(row, json_columns))
            .collect()
    }
}

fn tenant_param(tenant_id: Option<&str>) -> Value {
    tenant_id.map_or(Value::Null, |t| Value::String(t.to_string()))
}

/// Decode a snake_case row into a camelCase model type
///
/// Columns listed in `json_columns` may arrive as JSON text and are parsed.
fn decode_row<T: DeserializeOwned>(row: Row, json_columns: &[&str]) -> RegistryResult<T> {
    let mut out = Map::with_capacity(row.len());
    for (column, value) in row {
        let value = match value {
            Value::String(text) if json_columns.contains(&column.as_str()) => {
                serde_json::from_str(&text).map_err(|e| {
                    RegistryError::invalid(format!("column {} is not valid JSON: {}", column, e))
                })?
            }
            other => other,
        };
        out.insert(camel_case(&column), value);
    }
    serde_json::from_value(Value::Object(out))
        .map_err(|e| RegistryError::invalid(format!("malformed row: {}", e)))
}

fn camel_case(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    let mut upper = false;
    for c in column.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[async_trait]
impl ContractStore for SqlContractStore {
    fn name(&self) -> &str {
        "sql"
    }

    async fn find(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
        version: u32,
    ) -> RegistryResult<Option<ContractRecord>> {
        let statement = format!(
            "SELECT {} FROM contract_registry WHERE {} AND name = $3 AND version = $4",
            RECORD_COLUMNS, SCOPE_FILTER
        );
        let params = [tenant_param(tenant_id), json!(contract_type), json!(name), json!(version)];
        Ok(self.fetch(&statement, &params, &["schema"]).await?.into_iter().next())
    }

    async fn latest_active(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: &str,
    ) -> RegistryResult<Option<ContractRecord>> {
        let statement = format!(
            "SELECT {} FROM contract_registry WHERE {} AND name = $3 AND status = 'active' \
             ORDER BY version DESC LIMIT 1",
            RECORD_COLUMNS, SCOPE_FILTER
        );
        let params = [tenant_param(tenant_id), json!(contract_type), json!(name)];
        Ok(self.fetch(&statement, &params, &["schema"]).await?.into_iter().next())
    }

    async fn upsert(&self, record: &ContractRecord) -> RegistryResult<()> {
        let statement = format!(
            "INSERT INTO contract_registry ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (tenant_id, contract_type, name, version) DO UPDATE SET \
             schema = EXCLUDED.schema, status = EXCLUDED.status, \
             content_hash = EXCLUDED.content_hash, updated_at = EXCLUDED.updated_at",
            RECORD_COLUMNS
        );
        let params = [
            json!(record.id),
            tenant_param(record.tenant_id.as_deref()),
            json!(record.contract_type),
            json!(record.name),
            json!(record.version),
            record.schema.clone(),
            json!(record.status),
            json!(record.content_hash),
            json!(record.created_at),
            json!(record.updated_at),
        ];
        self.executor.execute(&statement, &params).await?;
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
        let statement = format!(
            "UPDATE contract_registry SET status = $5, updated_at = now() \
             WHERE {} AND name = $3 AND version = $4",
            SCOPE_FILTER
        );
        let params = [
            tenant_param(tenant_id),
            json!(contract_type),
            json!(name),
            json!(version),
            json!(status),
        ];
        Ok(self.executor.execute(&statement, &params).await? > 0)
    }

    async fn list(
        &self,
        tenant_id: Option<&str>,
        contract_type: ContractType,
    ) -> RegistryResult<Vec<ContractRecord>> {
        let statement = format!(
            "SELECT {} FROM contract_registry WHERE {} ORDER BY name, version",
            RECORD_COLUMNS, SCOPE_FILTER
        );
        let params = [tenant_param(tenant_id), json!(contract_type)];
        self.fetch(&statement, &params, &["schema"]).await
    }

    async fn data_contract(&self, tenant_id: Option<&str>, id: &str) -> RegistryResult<Option<DataContract>> {
        let statement = "SELECT id, classification, sensitivity, governance_tier, standard_pack_refs, \
                         owner, steward, schema FROM data_contracts \
                         WHERE tenant_id IS NOT DISTINCT FROM $1 AND id = $2";
        let params = [tenant_param(tenant_id), json!(id)];
        Ok(self
            .fetch(statement, &params, &["schema", "standard_pack_refs"])
            .await?
            .into_iter()
            .next())
    }

    async fn put_data_contract(&self, tenant_id: Option<&str>, contract: &DataContract) -> RegistryResult<()> {
        let statement = "INSERT INTO data_contracts (tenant_id, id, classification, sensitivity, \
                         governance_tier, standard_pack_refs, owner, steward, schema) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                         ON CONFLICT (tenant_id, id) DO UPDATE SET \
                         classification = EXCLUDED.classification, sensitivity = EXCLUDED.sensitivity, \
                         governance_tier = EXCLUDED.governance_tier, \
                         standard_pack_refs = EXCLUDED.standard_pack_refs, owner = EXCLUDED.owner, \
                         steward = EXCLUDED.steward, schema = EXCLUDED.schema";
        let params = [
            tenant_param(tenant_id),
            json!(contract.id),
            json!(contract.classification),
            json!(contract.sensitivity),
            json!(contract.governance_tier),
            json!(contract.standard_pack_refs),
            json!(contract.owner),
            json!(contract.steward),
            contract.schema.clone().unwrap_or(Value::Null),
        ];
        self.executor.execute(statement, &params).await?;
        Ok(())
    }

    async fn links_for_action(
        &self,
        tenant_id: Option<&str>,
        action_id: &str,
    ) -> RegistryResult<Vec<ActionDataContractLink>> {
        let statement = "SELECT action_id, data_contract_id, access_type FROM action_data_contract_links \
                         WHERE tenant_id IS NOT DISTINCT FROM $1 AND action_id = $2 \
                         ORDER BY data_contract_id";
        let params = [tenant_param(tenant_id), json!(action_id)];
        self.fetch(statement, &params, &[]).await
    }

    async fn put_link(&self, tenant_id: Option<&str>, link: &ActionDataContractLink) -> RegistryResult<()> {
        let statement = "INSERT INTO action_data_contract_links \
                         (tenant_id, action_id, data_contract_id, access_type) VALUES ($1, $2, $3, $4) \
                         ON CONFLICT DO NOTHING";
        let params = [
            tenant_param(tenant_id),
            json!(link.action_id),
            json!(link.data_contract_id),
            json!(link.access_type),
        ];
        self.executor.execute(statement, &params).await?;
        Ok(())
    }
}
