//! Breaking-change analysis and migration planning
//!
//! Two object descriptors are compared field by field (top level only, in
//! name order). Compatible changes produce a single `direct` phase; any
//! breaking change produces the five-phase `dual-write` plan.

use action_kernel_schema::{describe_fields, FieldDescriptor, NodeKind, SchemaNode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{MigrationError, MigrationResult};
use crate::plan::{
    BreakingChange, BreakingChangeKind, MigrationPhase, MigrationPlan, MigrationStrategy, PhaseAction,
    PhaseDuration,
};

/// Suffix of the column holding a changed field's new representation
pub const NEXT_SUFFIX: &str = "_next";

/// Suffix a replaced column is renamed to until it is dropped
pub const LEGACY_SUFFIX: &str = "_legacy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Days dual-write stays enabled before backfill
    pub grace_period_days: u32,
    /// Days old columns are kept after readers switch
    pub safety_window_days: u32,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            grace_period_days: 7,
            safety_window_days: 30,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationAnalyzer {
    settings: MigrationSettings,
}

impl MigrationAnalyzer {
    pub fn new(settings: MigrationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    /// Plan the migration of `entity` from `old` to `new`
    pub fn analyze(&self, entity: &str, old: &Value, new: &Value) -> MigrationResult<MigrationPlan> {
        check_identifier(entity)?;
        let old_fields = fields_of(old)?;
        let new_fields = fields_of(new)?;

        let changes = breaking_changes(&old_fields, &new_fields);
        let plan = if changes.is_empty() {
            self.direct_plan(entity, &old_fields, &new_fields)
        } else {
            self.dual_write_plan(entity, changes, &new_fields)
        };

        tracing::info!(
            entity = entity,
            strategy = %plan.strategy,
            breaking_changes = plan.breaking_changes.len(),
            phases = plan.phases.len(),
            "Migration planned"
        );
        Ok(plan)
    }

    fn direct_plan(
        &self,
        entity: &str,
        old: &BTreeMap<String, FieldDescriptor>,
        new: &BTreeMap<String, FieldDescriptor>,
    ) -> MigrationPlan {
        let mut statements = Vec::new();
        for (name, field) in new {
            match old.get(name) {
                None => statements.push(format!(
                    "ALTER TABLE {} ADD COLUMN {} {} NULL",
                    entity,
                    name,
                    sql_type(field.kind)
                )),
                Some(before) if before.required && !field.required => statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL",
                    entity, name
                )),
                Some(_) => {}
            }
        }

        MigrationPlan {
            entity: entity.to_string(),
            strategy: MigrationStrategy::Direct,
            breaking_changes: Vec::new(),
            phases: vec![MigrationPhase {
                index: 0,
                action: PhaseAction::ApplyDirect,
                statement: join(statements),
                duration: PhaseDuration::Instant,
                rollback_supported: true,
            }],
        }
    }

    fn dual_write_plan(
        &self,
        entity: &str,
        changes: Vec<BreakingChange>,
        new: &BTreeMap<String, FieldDescriptor>,
    ) -> MigrationPlan {
        let mut add = Vec::new();
        let mut backfill = Vec::new();
        let mut renames = Vec::new();
        let mut constraints = Vec::new();
        let mut drops = Vec::new();

        for change in &changes {
            let field = &change.field;
            let new_type = new.get(field).map(|f| sql_type(f.kind)).unwrap_or("JSONB");
            match change.kind {
                BreakingChangeKind::TypeChanged => {
                    let next = format!("{}{}", field, NEXT_SUFFIX);
                    let legacy = format!("{}{}", field, LEGACY_SUFFIX);
                    add.push(format!("ALTER TABLE {} ADD COLUMN {} {} NULL", entity, next, new_type));
                    backfill.push(format!(
                        "UPDATE {} SET {} = CAST({} AS {}) WHERE {} IS NULL",
                        entity, next, field, new_type, next
                    ));
                    renames.push(format!("ALTER TABLE {} RENAME COLUMN {} TO {}", entity, field, legacy));
                    renames.push(format!("ALTER TABLE {} RENAME COLUMN {} TO {}", entity, next, field));
                    drops.push(format!("ALTER TABLE {} DROP COLUMN {}", entity, legacy));
                }
                BreakingChangeKind::NewRequiredField => {
                    // the column already exists when the field was optional before
                    if change.old_type.is_none() {
                        add.push(format!("ALTER TABLE {} ADD COLUMN {} {} NULL", entity, field, new_type));
                    }
                    constraints.push(format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL", entity, field));
                }
                BreakingChangeKind::FieldRemoved => {
                    drops.push(format!("ALTER TABLE {} DROP COLUMN {}", entity, field));
                }
            }
        }
        renames.extend(constraints);

        let phases = vec![
            (PhaseAction::AddShadowColumns, join(add), PhaseDuration::Instant, true),
            (
                PhaseAction::EnableDualWrite,
                None,
                PhaseDuration::Days {
                    days: self.settings.grace_period_days,
                },
                true,
            ),
            (PhaseAction::Backfill, join(backfill), PhaseDuration::LongRunning, false),
            (PhaseAction::SwitchReaders, join(renames), PhaseDuration::Instant, true),
            (
                PhaseAction::DropOldColumns,
                join(drops),
                PhaseDuration::Days {
                    days: self.settings.safety_window_days,
                },
                false,
            ),
        ]
        .into_iter()
        .enumerate()
        .map(|(index, (action, statement, duration, rollback_supported))| MigrationPhase {
            index,
            action,
            statement,
            duration,
            rollback_supported,
        })
        .collect();

        MigrationPlan {
            entity: entity.to_string(),
            strategy: MigrationStrategy::DualWrite,
            breaking_changes: changes,
            phases,
        }
    }
}

/// Breaking changes between two field sets, in field name order
pub fn breaking_changes(
    old: &BTreeMap<String, FieldDescriptor>,
    new: &BTreeMap<String, FieldDescriptor>,
) -> Vec<BreakingChange> {
    let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    let mut changes = Vec::new();

    for name in names {
        match (old.get(name), new.get(name)) {
            (Some(before), None) => changes.push(
                BreakingChange::new(BreakingChangeKind::FieldRemoved, name.as_str())
                    .with_types(Some(before.kind.to_string()), None),
            ),
            (Some(before), Some(after)) => {
                if before.kind != after.kind {
                    changes.push(
                        BreakingChange::new(BreakingChangeKind::TypeChanged, name.as_str())
                            .with_types(Some(before.kind.to_string()), Some(after.kind.to_string())),
                    );
                }
                if after.required && !before.required {
                    changes.push(
                        BreakingChange::new(BreakingChangeKind::NewRequiredField, name.as_str())
                            .with_types(Some(before.kind.to_string()), Some(after.kind.to_string())),
                    );
                }
            }
            (None, Some(after)) if after.required => changes.push(
                BreakingChange::new(BreakingChangeKind::NewRequiredField, name.as_str())
                    .with_types(None, Some(after.kind.to_string())),
            ),
            _ => {}
        }
    }
    changes
}

fn fields_of(descriptor: &Value) -> MigrationResult<BTreeMap<String, FieldDescriptor>> {
    let node = SchemaNode::parse(descriptor)?;
    let fields = describe_fields(&node);
    for field in &fields {
        check_identifier(&field.name)?;
    }
    Ok(fields.into_iter().map(|f| (f.name.clone(), f)).collect())
}

fn sql_type(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::String | NodeKind::Enum => "TEXT",
        NodeKind::Number => "DOUBLE PRECISION",
        NodeKind::Boolean => "BOOLEAN",
        NodeKind::Date => "TIMESTAMPTZ",
        _ => "JSONB",
    }
}

/// Names are spliced into DDL, so only plain SQL identifiers are accepted
fn check_identifier(name: &str) -> MigrationResult<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MigrationError::InvalidPlan(format!("'{}' is not a valid SQL identifier", name)))
    }
}

fn join(statements: Vec<String>) -> Option<String> {
    if statements.is_empty() {
        None
    } else {
        Some(statements.join(";\n"))
    }
}
