//! Schema evolution for the action contract kernel
//!
//! - [`MigrationAnalyzer`] diffs two object descriptors and plans either a
//!   one-phase `direct` migration or a five-phase `dual-write` migration.
//! - [`MigrationEngine`] applies a plan phase by phase through the storage
//!   executor, auditing each phase.
//! - [`DualReaderProxy`] compares original and shadow reads while a table is
//!   under dual-write and reports drift.

pub mod analyzer;
pub mod drift;
pub mod dual_write;
pub mod engine;
pub mod error;
pub mod plan;
pub mod reader;

pub use analyzer::{breaking_changes, MigrationAnalyzer, MigrationSettings, LEGACY_SUFFIX, NEXT_SUFFIX};
pub use drift::{detect_drift, DriftRecord, DRIFT_SAMPLE_ROWS};
pub use dual_write::DualWriteRegistry;
pub use engine::{MigrationEngine, MigrationReport, MIGRATION_AUDIT_ACTION};
pub use error::{MigrationError, MigrationResult};
pub use plan::{
    BreakingChange, BreakingChangeKind, MigrationPhase, MigrationPlan, MigrationStrategy, PhaseAction,
    PhaseDuration,
};
pub use reader::{DualReaderProxy, DEFAULT_SHADOW_SUFFIX, DRIFT_EVENT};
