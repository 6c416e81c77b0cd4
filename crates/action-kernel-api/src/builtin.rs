//! Built-in engines
//!
//! - `registry`: read-only queries over the contract registry.
//! - `metadata`: governed entity mutations. Both actions carry a governance
//!   subject, so they pass through tier compliance and HITL approval before
//!   the handler runs.

use action_kernel_dispatch::{ActionHandler, Engine, EngineRegistry, HandlerError, HandlerResult, KernelResult, SandboxContext};
use action_kernel_policy::{GovernanceSubject, GOVERNED_TAG};
use action_kernel_registry::{
    ActionContract, ActionKind, ContractRecord, ContractStatus, ContractType, GovernanceTier, RiskBand,
    SideEffectLevel,
};
use action_kernel_schema::{describe_fields, SchemaNode, Validator};
use async_trait::async_trait;
use serde_json::{json, Value};

pub const REGISTRY_DOMAIN: &str = "registry";
pub const METADATA_DOMAIN: &str = "metadata";

pub const LIST_CONTRACTS: &str = "registry.list.contracts";
pub const DESCRIBE_CONTRACT: &str = "registry.describe.contract";
pub const CREATE_ENTITY: &str = "metadata.create.entity";
pub const UPDATE_TIER: &str = "metadata.update.tier";

/// Table mirrored into storage for every governed entity
pub const ENTITY_TABLE: &str = "metadata_entities";

pub const ENTITY_CREATED_EVENT: &str = "metadata.entity_created";
pub const TIER_CHANGED_EVENT: &str = "metadata.tier_changed";

/// Engine table with the registry and metadata engines
pub fn builtin_engines() -> KernelResult<EngineRegistry> {
    EngineRegistry::new()
        .with_engine(registry_engine())?
        .with_engine(metadata_engine())
}

pub fn registry_engine() -> Engine {
    Engine::new(REGISTRY_DOMAIN)
        .handler(LIST_CONTRACTS, ListContracts)
        .handler(DESCRIBE_CONTRACT, DescribeContract)
}

pub fn metadata_engine() -> Engine {
    Engine::new(METADATA_DOMAIN)
        .handler(CREATE_ENTITY, CreateEntity)
        .handler(UPDATE_TIER, UpdateTier)
}

fn optional(inner: Value) -> Value {
    json!({"type": "optional", "definition": {"inner": inner}})
}

fn contract_type_schema() -> Value {
    json!({"type": "enum", "definition": {"values": ["action", "entity", "data"]}})
}

fn tier_schema() -> Value {
    let values: Vec<&str> = GovernanceTier::ALL.iter().map(|t| t.as_str()).collect();
    json!({"type": "enum", "definition": {"values": values}})
}

fn entity_name_schema() -> Value {
    json!({"type": "string", "definition": {"min": 1, "max": 63, "pattern": "^[a-z][a-z0-9_]*$"}})
}

/// Descriptor of the governance subject carried by metadata mutations
fn governance_schema(current_tier_required: bool) -> Value {
    let current_tier = if current_tier_required {
        tier_schema()
    } else {
        optional(tier_schema())
    };
    json!({
        "type": "object",
        "definition": {"shape": {
            "urn": optional(json!({"type": "string"})),
            "tier": tier_schema(),
            "currentTier": current_tier,
            "hasLineage": optional(json!({"type": "boolean"})),
            "hasProfiling": optional(json!({"type": "boolean"})),
            "standardPackRefs": optional(json!({"type": "array", "definition": {"items": {"type": "string"}}})),
            "owner": optional(json!({"type": "string", "definition": {"min": 1}})),
            "steward": optional(json!({"type": "string", "definition": {"min": 1}})),
            "approvalRequestId": optional(json!({"type": "string"}))
        }}
    })
}

fn contract_type_of(input: &Value) -> Result<ContractType, HandlerError> {
    match input.get("contractType").and_then(Value::as_str) {
        Some(raw) => raw.parse().map_err(HandlerError::from),
        None => Ok(ContractType::Action),
    }
}

fn subject_of(input: &Value) -> Result<GovernanceSubject, HandlerError> {
    GovernanceSubject::from_input(input)
        .map_err(|e| HandlerError::failed(e.to_string()))?
        .ok_or_else(|| HandlerError::failed("governance subject missing"))
}

fn summary(record: &ContractRecord) -> Value {
    json!({
        "name": record.name,
        "contractType": record.contract_type,
        "version": record.version,
        "status": record.status,
        "contentHash": record.content_hash,
        "updatedAt": record.updated_at,
    })
}

pub struct ListContracts;

#[async_trait]
impl ActionHandler for ListContracts {
    fn contract(&self) -> Option<ActionContract> {
        Some(
            ActionContract::new(LIST_CONTRACTS, 1, ActionKind::Query).with_input_schema(json!({
                "type": "object",
                "definition": {"shape": {"contractType": optional(contract_type_schema())}}
            })),
        )
    }

    async fn handle(&self, ctx: SandboxContext, input: Value) -> HandlerResult {
        let contract_type = contract_type_of(&input)?;
        let records = ctx.registry()?.list(ctx.tenant(), contract_type).await?;
        let contracts: Vec<Value> = records.iter().map(summary).collect();
        Ok(json!({ "contracts": contracts }))
    }
}

pub struct DescribeContract;

#[async_trait]
impl ActionHandler for DescribeContract {
    fn contract(&self) -> Option<ActionContract> {
        Some(
            ActionContract::new(DESCRIBE_CONTRACT, 1, ActionKind::Query).with_input_schema(json!({
                "type": "object",
                "definition": {"shape": {
                    "name": {"type": "string", "definition": {"min": 1}},
                    "contractType": optional(contract_type_schema()),
                    "version": optional(json!({"type": "number", "definition": {"int": true, "positive": true}}))
                }}
            })),
        )
    }

    async fn handle(&self, ctx: SandboxContext, input: Value) -> HandlerResult {
        let contract_type = contract_type_of(&input)?;
        let name = input["name"].as_str().unwrap_or_default();
        let version = input
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());

        let Some(record) = ctx.registry()?.resolve(ctx.tenant(), contract_type, name, version).await? else {
            return Ok(json!({ "found": false }));
        };

        // entity blobs wrap their descriptor under "schema"
        let descriptor = match contract_type {
            ContractType::Entity => record.schema.get("schema").cloned(),
            ContractType::Action => record.schema.get("inputSchema").cloned(),
            ContractType::Data => Some(record.schema.clone()),
        };
        let fields = descriptor
            .as_ref()
            .and_then(|d| SchemaNode::parse(d).ok())
            .map(|node| describe_fields(&node))
            .unwrap_or_default();

        Ok(json!({
            "found": true,
            "contract": summary(&record),
            "schema": record.schema,
            "fields": fields,
        }))
    }
}

pub struct CreateEntity;

#[async_trait]
impl ActionHandler for CreateEntity {
    fn contract(&self) -> Option<ActionContract> {
        Some(
            ActionContract::new(CREATE_ENTITY, 1, ActionKind::Command)
                .with_tags([GOVERNED_TAG])
                .with_risk_band(RiskBand::Medium)
                .with_side_effects(SideEffectLevel::Local)
                .with_input_schema(json!({
                    "type": "object",
                    "definition": {"shape": {
                        "name": entity_name_schema(),
                        "schema": {"type": "object", "definition": {"shape": {
                            "type": {"type": "literal", "definition": {"value": "object"}},
                            "definition": {"type": "any"}
                        }}},
                        "governance": governance_schema(false)
                    }}
                }))
                .with_output_schema(json!({
                    "type": "object",
                    "definition": {"strict": true, "shape": {
                        "name": {"type": "string"},
                        "version": {"type": "number", "definition": {"int": true, "positive": true}},
                        "tier": tier_schema(),
                        "approval": {"type": "nullable", "definition": {"inner": {"type": "string"}}}
                    }}
                })),
        )
    }

    async fn handle(&self, ctx: SandboxContext, input: Value) -> HandlerResult {
        let name = input["name"].as_str().unwrap_or_default().to_string();
        let subject = subject_of(&input)?;
        let descriptor = input["schema"].clone();
        Validator::from_descriptor(&descriptor)
            .map_err(|e| HandlerError::failed(format!("entity schema rejected: {}", e)))?;

        let registry = ctx.registry()?;
        let tenant = ctx.tenant();
        if registry
            .list(tenant, ContractType::Entity)
            .await?
            .iter()
            .any(|r| r.name == name)
        {
            return Err(HandlerError::failed(format!("entity '{}' already exists", name)));
        }

        let blob = json!({
            "schema": descriptor,
            "tier": subject.tier,
            "urn": subject.urn,
            "owner": subject.owner,
            "steward": subject.steward,
        });
        let record = ContractRecord::new(tenant, ContractType::Entity, &name, 1, blob).with_status(ContractStatus::Active);
        registry.register(record, false).await?;

        let row = json!({
            "tenantId": tenant,
            "name": name,
            "tier": subject.tier,
            "owner": subject.owner,
            "steward": subject.steward,
            "createdBy": ctx.actor(),
        });
        ctx.storage()?
            .execute(&format!("INSERT INTO {} (record) VALUES ($1)", ENTITY_TABLE), &[row])
            .await?;

        ctx.log("Entity created", &json!({"name": name, "tier": subject.tier}));
        ctx.emit(
            ENTITY_CREATED_EVENT,
            json!({"name": name, "tier": subject.tier, "approval": ctx.approval()}),
        )
        .await?;

        Ok(json!({
            "name": name,
            "version": 1,
            "tier": subject.tier,
            "approval": ctx.approval(),
        }))
    }
}

pub struct UpdateTier;

#[async_trait]
impl ActionHandler for UpdateTier {
    fn contract(&self) -> Option<ActionContract> {
        Some(
            ActionContract::new(UPDATE_TIER, 1, ActionKind::Mutation)
                .with_tags([GOVERNED_TAG])
                .with_risk_band(RiskBand::High)
                .with_side_effects(SideEffectLevel::Local)
                .with_input_schema(json!({
                    "type": "object",
                    "definition": {"shape": {
                        "name": entity_name_schema(),
                        "governance": governance_schema(true)
                    }}
                })),
        )
    }

    async fn handle(&self, ctx: SandboxContext, input: Value) -> HandlerResult {
        let name = input["name"].as_str().unwrap_or_default().to_string();
        let subject = subject_of(&input)?;
        let registry = ctx.registry()?;
        let tenant = ctx.tenant();

        let current = registry
            .resolve(tenant, ContractType::Entity, &name, None)
            .await?
            .ok_or_else(|| HandlerError::failed(format!("entity '{}' not found", name)))?;

        let stored_tier: Option<GovernanceTier> = current
            .schema
            .get("tier")
            .and_then(|t| serde_json::from_value(t.clone()).ok());
        if stored_tier != subject.current_tier {
            return Err(HandlerError::failed(format!(
                "entity '{}' is at {}, not {}",
                name,
                stored_tier.map(|t| t.as_str()).unwrap_or("no tier"),
                subject.current_tier.map(|t| t.as_str()).unwrap_or("no tier"),
            )));
        }

        let mut blob = current.schema.clone();
        blob["tier"] = json!(subject.tier);
        let version = current.version + 1;
        let next = ContractRecord::new(tenant, ContractType::Entity, &name, version, blob).with_status(ContractStatus::Active);
        registry.register(next, false).await?;
        registry
            .deprecate(tenant, ContractType::Entity, &name, current.version)
            .await?;

        ctx.storage()?
            .execute(
                &format!("UPDATE {} SET tier = $1 WHERE name = $2 AND tenant_id = $3", ENTITY_TABLE),
                &[json!(subject.tier), json!(name), json!(tenant)],
            )
            .await?;

        ctx.emit(
            TIER_CHANGED_EVENT,
            json!({
                "name": name,
                "from": subject.current_tier,
                "to": subject.tier,
                "approval": ctx.approval(),
            }),
        )
        .await?;

        Ok(json!({
            "name": name,
            "version": version,
            "tier": subject.tier,
            "previousTier": subject.current_tier,
            "approval": ctx.approval(),
        }))
    }
}
