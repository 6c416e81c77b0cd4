//! Contract, data contract and governance data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{RegistryError, RegistryResult};

/// Kind of record held in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    Action,
    Entity,
    Data,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Action => "action",
            ContractType::Entity => "entity",
            ContractType::Data => "data",
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action" => Ok(ContractType::Action),
            "entity" => Ok(ContractType::Entity),
            "data" => Ok(ContractType::Data),
            other => Err(RegistryError::invalid(format!("unknown contract type '{}'", other))),
        }
    }
}

/// Lifecycle status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Draft,
    Active,
    Deprecated,
}

impl ContractStatus {
    /// Draft may be activated or deprecated, active may be deprecated.
    /// Deprecated is terminal.
    pub fn can_transition_to(&self, next: ContractStatus) -> bool {
        matches!(
            (self, next),
            (ContractStatus::Draft, ContractStatus::Active)
                | (ContractStatus::Draft, ContractStatus::Deprecated)
                | (ContractStatus::Active, ContractStatus::Deprecated)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Draft => "draft",
            ContractStatus::Active => "active",
            ContractStatus::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ContractStatus::Draft),
            "active" => Ok(ContractStatus::Active),
            "deprecated" => Ok(ContractStatus::Deprecated),
            other => Err(RegistryError::invalid(format!("unknown status '{}'", other))),
        }
    }
}

/// A versioned registry record
///
/// `tenant_id = None` is platform-global. Lookups match the scope exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    pub id: String,
    pub tenant_id: Option<String>,
    pub contract_type: ContractType,
    pub name: String,
    pub version: u32,
    pub schema: Value,
    pub status: ContractStatus,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContractRecord {
    /// New draft record; the content hash is computed from `schema`
    pub fn new(
        tenant_id: Option<&str>,
        contract_type: ContractType,
        name: impl Into<String>,
        version: u32,
        schema: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.map(str::to_string),
            contract_type,
            name: name.into(),
            version,
            content_hash: content_hash(&schema),
            schema,
            status: ContractStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record for an action contract, keyed by its id and version
    pub fn from_action(tenant_id: Option<&str>, contract: &ActionContract) -> RegistryResult<Self> {
        let schema = serde_json::to_value(contract)
            .map_err(|e| RegistryError::invalid(format!("unserializable contract: {}", e)))?;
        Ok(Self::new(tenant_id, ContractType::Action, contract.id.clone(), contract.version, schema))
    }

    pub fn with_status(mut self, status: ContractStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ContractStatus::Active
    }

    /// Structural checks applied before a record is stored
    pub fn validate(&self) -> RegistryResult<()> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::invalid("record name must not be empty"));
        }
        if self.version == 0 {
            return Err(RegistryError::invalid(format!(
                "{}: versions start at 1",
                self.name
            )));
        }
        if !self.schema.is_object() {
            return Err(RegistryError::invalid(format!(
                "{}@v{}: schema blob must be a JSON object",
                self.name, self.version
            )));
        }
        if self.contract_type == ContractType::Action {
            ActionContract::from_record(self)?;
        }
        Ok(())
    }
}

/// SHA-256 hex digest of the canonical JSON form of a blob
///
/// Object keys serialize in sorted order, so equal documents hash equally.
pub fn content_hash(schema: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(schema.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Query,
    Command,
    Mutation,
}

impl ActionKind {
    /// query reads; command and mutation write
    pub fn access_type(&self) -> AccessType {
        match self {
            ActionKind::Query => AccessType::Read,
            ActionKind::Command | ActionKind::Mutation => AccessType::Write,
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, ActionKind::Query)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContractClassification {
    pub pii_level: PiiLevel,
    pub sensitivity: Sensitivity,
    pub compliance: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub requests: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    Tenant,
    Actor,
    Global,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    pub ttl_seconds: u64,
    pub scope: CacheScope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Sync,
    Async,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffectLevel {
    #[default]
    None,
    Local,
    External,
}

/// Risk band of an action, also used for approval requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskBand {
    /// Next band up, saturating at critical
    pub fn bump(self) -> Self {
        match self {
            RiskBand::Low => RiskBand::Medium,
            RiskBand::Medium => RiskBand::High,
            RiskBand::High | RiskBand::Critical => RiskBand::Critical,
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskBand::Low => "LOW",
            RiskBand::Medium => "MEDIUM",
            RiskBand::High => "HIGH",
            RiskBand::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Idempotency {
    Idempotent,
    #[default]
    NonIdempotent,
    Keyed,
}

/// Versioned metadata description of a callable operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContract {
    /// `domain.verb[.noun]`
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub domain: String,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub classification: ContractClassification,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CachePolicy>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub side_effect_level: SideEffectLevel,
    #[serde(default)]
    pub risk_band: RiskBand,
    #[serde(default)]
    pub idempotency: Idempotency,
    #[serde(default)]
    pub deprecated: bool,
}

impl ActionContract {
    pub fn new(id: impl Into<String>, version: u32, kind: ActionKind) -> Self {
        let id = id.into();
        let domain = id.split('.').next().unwrap_or_default().to_string();
        Self {
            id,
            version,
            domain,
            kind,
            input_schema: None,
            output_schema: None,
            classification: ContractClassification::default(),
            tags: Vec::new(),
            permissions: Vec::new(),
            rate_limit: None,
            cache: None,
            mode: ExecutionMode::default(),
            side_effect_level: SideEffectLevel::default(),
            risk_band: RiskBand::default(),
            idempotency: Idempotency::default(),
            deprecated: false,
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_risk_band(mut self, band: RiskBand) -> Self {
        self.risk_band = band;
        self
    }

    pub fn with_side_effects(mut self, level: SideEffectLevel) -> Self {
        self.side_effect_level = level;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Parse the contract held in an action record
    ///
    /// Id and version come from the record. A blob that does not describe an
    /// action contract is `ContractInvalid`.
    pub fn from_record(record: &ContractRecord) -> RegistryResult<Self> {
        if record.contract_type != ContractType::Action {
            return Err(RegistryError::invalid(format!(
                "{} is a {} record, not an action",
                record.name, record.contract_type
            )));
        }

        let mut contract: ActionContract = serde_json::from_value(record.schema.clone())
            .map_err(|e| {
                RegistryError::invalid(format!("{}@v{}: {}", record.name, record.version, e))
            })?;

        if !contract.id.is_empty() && contract.id != record.name {
            return Err(RegistryError::invalid(format!(
                "contract id '{}' does not match record name '{}'",
                contract.id, record.name
            )));
        }
        let segments: Vec<&str> = record.name.split('.').collect();
        if !(2..=3).contains(&segments.len()) || segments.iter().any(|s| s.is_empty()) {
            return Err(RegistryError::invalid(format!(
                "action id '{}' must look like domain.verb[.noun]",
                record.name
            )));
        }

        contract.id = record.name.clone();
        contract.version = record.version;
        if contract.domain.is_empty() {
            contract.domain = segments[0].to_string();
        }
        if record.status == ContractStatus::Deprecated {
            contract.deprecated = true;
        }
        Ok(contract)
    }
}

/// Business classification of a data contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClassification {
    Public,
    Internal,
    Operational,
    Financial,
    Regulatory,
}

impl DataClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClassification::Public => "public",
            DataClassification::Internal => "internal",
            DataClassification::Operational => "operational",
            DataClassification::Financial => "financial",
            DataClassification::Regulatory => "regulatory",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    #[default]
    Public,
    Internal,
    Confidential,
    Restricted,
}

/// How an action touches a linked data contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "write")]
    Write,
    #[serde(rename = "read-write")]
    ReadWrite,
}

impl AccessType {
    pub fn reads(&self) -> bool {
        matches!(self, AccessType::Read | AccessType::ReadWrite)
    }

    pub fn writes(&self) -> bool {
        matches!(self, AccessType::Write | AccessType::ReadWrite)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Read => "read",
            AccessType::Write => "write",
            AccessType::ReadWrite => "read-write",
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Governance strictness rank; tier 1 is the strictest
///
/// Ordering follows strictness: `Tier1 < Tier2 < ... < Tier5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GovernanceTier {
    #[serde(rename = "tier_1")]
    Tier1,
    #[serde(rename = "tier_2")]
    Tier2,
    #[serde(rename = "tier_3")]
    Tier3,
    #[serde(rename = "tier_4")]
    Tier4,
    #[serde(rename = "tier_5")]
    Tier5,
}

/// Compliance artifacts and approval gating required by a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierRequirements {
    pub requires_lineage: bool,
    pub requires_profiling: bool,
    #[serde(rename = "requiresHITL")]
    pub requires_hitl: bool,
    pub requires_standard_pack: bool,
    pub requires_ownership: bool,
    pub min_approvals: u32,
    pub approval_timeout_hours: u32,
}

impl GovernanceTier {
    pub const ALL: [GovernanceTier; 5] = [
        GovernanceTier::Tier1,
        GovernanceTier::Tier2,
        GovernanceTier::Tier3,
        GovernanceTier::Tier4,
        GovernanceTier::Tier5,
    ];

    pub fn requirements(&self) -> TierRequirements {
        let (lineage, profiling, hitl, pack, ownership, approvals, timeout) = match self {
            GovernanceTier::Tier1 => (true, true, true, true, true, 2, 24),
            GovernanceTier::Tier2 => (true, true, true, false, true, 1, 48),
            GovernanceTier::Tier3 => (true, false, false, false, true, 0, 72),
            GovernanceTier::Tier4 | GovernanceTier::Tier5 => {
                (false, false, false, false, false, 0, 0)
            }
        };
        TierRequirements {
            requires_lineage: lineage,
            requires_profiling: profiling,
            requires_hitl: hitl,
            requires_standard_pack: pack,
            requires_ownership: ownership,
            min_approvals: approvals,
            approval_timeout_hours: timeout,
        }
    }

    /// True when `self` demands more than `other`
    pub fn is_stricter_than(&self, other: GovernanceTier) -> bool {
        *self < other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GovernanceTier::Tier1 => "tier_1",
            GovernanceTier::Tier2 => "tier_2",
            GovernanceTier::Tier3 => "tier_3",
            GovernanceTier::Tier4 => "tier_4",
            GovernanceTier::Tier5 => "tier_5",
        }
    }
}

impl fmt::Display for GovernanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GovernanceTier {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GovernanceTier::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| RegistryError::invalid(format!("unknown governance tier '{}'", s)))
    }
}

/// Classification and governance metadata for a data set an action touches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataContract {
    pub id: String,
    pub classification: DataClassification,
    pub sensitivity: Sensitivity,
    pub governance_tier: GovernanceTier,
    #[serde(default)]
    pub standard_pack_refs: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub steward: Option<String>,
    #[serde(default)]
    pub schema: Option<Value>,
}

impl DataContract {
    pub fn new(
        id: impl Into<String>,
        classification: DataClassification,
        sensitivity: Sensitivity,
        governance_tier: GovernanceTier,
    ) -> Self {
        Self {
            id: id.into(),
            classification,
            sensitivity,
            governance_tier,
            standard_pack_refs: Vec::new(),
            owner: None,
            steward: None,
            schema: None,
        }
    }

    pub fn with_ownership(mut self, owner: impl Into<String>, steward: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self.steward = Some(steward.into());
        self
    }
}

/// Many-to-many link between an action and a data contract
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDataContractLink {
    pub action_id: String,
    pub data_contract_id: String,
    pub access_type: AccessType,
}

impl ActionDataContractLink {
    pub fn new(
        action_id: impl Into<String>,
        data_contract_id: impl Into<String>,
        access_type: AccessType,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            data_contract_id: data_contract_id.into(),
            access_type,
        }
    }
}
