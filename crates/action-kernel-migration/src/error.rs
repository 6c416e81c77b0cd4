use action_kernel_schema::SchemaError;
use thiserror::Error;

use crate::plan::PhaseAction;

#[derive(Error, Debug)]
pub enum MigrationError {
    /// A phase failed mid-plan; nothing is compensated automatically
    #[error(
        "Migration of {entity} failed at phase {phase_index} ({action}) after completing {completed:?}: {reason}"
    )]
    MigrationExecution {
        entity: String,
        phase_index: usize,
        action: PhaseAction,
        completed: Vec<usize>,
        reason: String,
    },

    #[error("Invalid migration plan: {0}")]
    InvalidPlan(String),

    #[error("Schema descriptor rejected: {0}")]
    Schema(#[from] SchemaError),
}

impl MigrationError {
    /// Phases applied before the failure
    pub fn completed_phases(&self) -> &[usize] {
        match self {
            MigrationError::MigrationExecution { completed, .. } => completed,
            _ => &[],
        }
    }
}

pub type MigrationResult<T> = std::result::Result<T, MigrationError>;
