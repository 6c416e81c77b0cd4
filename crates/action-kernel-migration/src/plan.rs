//! Migration plan model

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakingChangeKind {
    FieldRemoved,
    TypeChanged,
    /// Required in the new schema, absent or optional in the old one
    NewRequiredField,
}

impl BreakingChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakingChangeKind::FieldRemoved => "field_removed",
            BreakingChangeKind::TypeChanged => "type_changed",
            BreakingChangeKind::NewRequiredField => "new_required_field",
        }
    }
}

impl fmt::Display for BreakingChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakingChange {
    pub kind: BreakingChangeKind,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_type: Option<String>,
}

impl BreakingChange {
    pub fn new(kind: BreakingChangeKind, field: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.into(),
            old_type: None,
            new_type: None,
        }
    }

    pub fn with_types(mut self, old_type: Option<String>, new_type: Option<String>) -> Self {
        self.old_type = old_type;
        self.new_type = new_type;
        self
    }
}

/// Renders as `<kind>:<field>`
impl fmt::Display for BreakingChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStrategy {
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "dual-write")]
    DualWrite,
}

impl fmt::Display for MigrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStrategy::Direct => f.write_str("direct"),
            MigrationStrategy::DualWrite => f.write_str("dual-write"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseAction {
    ApplyDirect,
    AddShadowColumns,
    EnableDualWrite,
    Backfill,
    SwitchReaders,
    DropOldColumns,
}

impl PhaseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseAction::ApplyDirect => "apply_direct",
            PhaseAction::AddShadowColumns => "add_shadow_columns",
            PhaseAction::EnableDualWrite => "enable_dual_write",
            PhaseAction::Backfill => "backfill",
            PhaseAction::SwitchReaders => "switch_readers",
            PhaseAction::DropOldColumns => "drop_old_columns",
        }
    }
}

impl fmt::Display for PhaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How long a phase is expected to run or be held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PhaseDuration {
    Instant,
    /// Held open for a number of days before the next phase
    Days { days: u32 },
    /// Background work proportional to table size
    LongRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPhase {
    pub index: usize,
    pub action: PhaseAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    pub duration: PhaseDuration,
    pub rollback_supported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub entity: String,
    pub strategy: MigrationStrategy,
    pub breaking_changes: Vec<BreakingChange>,
    pub phases: Vec<MigrationPhase>,
}

impl MigrationPlan {
    pub fn is_direct(&self) -> bool {
        self.strategy == MigrationStrategy::Direct
    }

    /// `<kind>:<field>` for every breaking change
    pub fn change_labels(&self) -> Vec<String> {
        self.breaking_changes.iter().map(|c| c.to_string()).collect()
    }

    /// Indexes of phases that cannot be rolled back
    pub fn irreversible_phases(&self) -> Vec<usize> {
        self.phases
            .iter()
            .filter(|p| !p.rollback_supported)
            .map(|p| p.index)
            .collect()
    }
}
