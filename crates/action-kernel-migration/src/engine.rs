//! Phase executor
//!
//! Phases run strictly in order through the storage executor. After each
//! phase an audit entry is appended before the next one starts. A failure
//! stops the plan where it is: later phases may be irreversible, so recovery
//! is left to an operator, who can continue with [`MigrationEngine::resume`].

use action_kernel_audit::AuditQueue;
use action_kernel_storage::StorageExecutor;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::dual_write::DualWriteRegistry;
use crate::error::{MigrationError, MigrationResult};
use crate::plan::{MigrationPhase, MigrationPlan, PhaseAction};

/// Audit action id used for migration entries
pub const MIGRATION_AUDIT_ACTION: &str = "migration.apply.phase";

const SYSTEM_ACTOR: &str = "system:migration";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub entity: String,
    pub completed_phases: Vec<usize>,
}

pub struct MigrationEngine {
    executor: Arc<dyn StorageExecutor>,
    audit: AuditQueue,
    dual_writes: Arc<DualWriteRegistry>,
    tenant_id: Option<String>,
    actor_id: String,
}

impl MigrationEngine {
    pub fn new(executor: Arc<dyn StorageExecutor>, audit: AuditQueue) -> Self {
        Self {
            executor,
            audit,
            dual_writes: Arc::new(DualWriteRegistry::new()),
            tenant_id: None,
            actor_id: SYSTEM_ACTOR.to_string(),
        }
    }

    /// Share the dual-write registry with a dual reader
    pub fn with_dual_writes(mut self, registry: Arc<DualWriteRegistry>) -> Self {
        self.dual_writes = registry;
        self
    }

    /// Attribute audit entries to an operator
    pub fn with_actor(mut self, tenant_id: Option<&str>, actor_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.map(str::to_string);
        self.actor_id = actor_id.into();
        self
    }

    pub fn dual_writes(&self) -> &Arc<DualWriteRegistry> {
        &self.dual_writes
    }

    pub async fn execute(&self, plan: &MigrationPlan) -> MigrationResult<MigrationReport> {
        self.resume(plan, 0).await
    }

    /// Run the phases of `plan` starting at `from_index`
    pub async fn resume(&self, plan: &MigrationPlan, from_index: usize) -> MigrationResult<MigrationReport> {
        if from_index > plan.phases.len() {
            return Err(MigrationError::InvalidPlan(format!(
                "cannot resume {} at phase {}: plan has {} phases",
                plan.entity,
                from_index,
                plan.phases.len()
            )));
        }
        for (position, phase) in plan.phases.iter().enumerate() {
            if phase.index != position {
                return Err(MigrationError::InvalidPlan(format!(
                    "phase at position {} has index {}",
                    position, phase.index
                )));
            }
        }

        tracing::info!(
            entity = %plan.entity,
            strategy = %plan.strategy,
            from_index = from_index,
            "Migration started"
        );

        let mut completed = Vec::new();
        for phase in &plan.phases[from_index..] {
            if let Err(reason) = self.apply(plan, phase).await {
                tracing::error!(
                    entity = %plan.entity,
                    phase = phase.index,
                    action = %phase.action,
                    completed = ?completed,
                    error = %reason,
                    "Migration phase failed"
                );
                self.audit_phase(plan, phase, "failed", Some(&reason)).await;
                return Err(MigrationError::MigrationExecution {
                    entity: plan.entity.clone(),
                    phase_index: phase.index,
                    action: phase.action,
                    completed,
                    reason,
                });
            }

            if let Err(e) = self
                .audit
                .append_guaranteed(
                    self.tenant_id.as_deref(),
                    &self.actor_id,
                    MIGRATION_AUDIT_ACTION,
                    phase_payload(plan, phase, "completed", None),
                )
                .await
            {
                return Err(MigrationError::MigrationExecution {
                    entity: plan.entity.clone(),
                    phase_index: phase.index,
                    action: phase.action,
                    completed,
                    reason: format!("audit entry not recorded: {}", e),
                });
            }

            tracing::info!(
                entity = %plan.entity,
                phase = phase.index,
                action = %phase.action,
                rollback_supported = phase.rollback_supported,
                "Migration phase completed"
            );
            completed.push(phase.index);
        }

        Ok(MigrationReport {
            entity: plan.entity.clone(),
            completed_phases: completed,
        })
    }

    async fn apply(&self, plan: &MigrationPlan, phase: &MigrationPhase) -> Result<(), String> {
        if let Some(statement) = &phase.statement {
            self.executor
                .execute(statement, &[])
                .await
                .map_err(|e| e.to_string())?;
        }
        match phase.action {
            PhaseAction::EnableDualWrite => self.dual_writes.enable(&plan.entity),
            PhaseAction::SwitchReaders => self.dual_writes.disable(&plan.entity),
            _ => {}
        }
        Ok(())
    }

    async fn audit_phase(&self, plan: &MigrationPlan, phase: &MigrationPhase, status: &str, error: Option<&str>) {
        let payload = phase_payload(plan, phase, status, error);
        if let Err(e) = self
            .audit
            .append_guaranteed(self.tenant_id.as_deref(), &self.actor_id, MIGRATION_AUDIT_ACTION, payload)
            .await
        {
            tracing::warn!(entity = %plan.entity, error = %e, "Migration audit entry dropped");
        }
    }
}

fn phase_payload(
    plan: &MigrationPlan,
    phase: &MigrationPhase,
    status: &str,
    error: Option<&str>,
) -> serde_json::Value {
    json!({
        "entity": plan.entity,
        "strategy": plan.strategy,
        "phaseIndex": phase.index,
        "action": phase.action,
        "statement": phase.statement,
        "rollbackSupported": phase.rollback_supported,
        "status": status,
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::MigrationAnalyzer;
    use action_kernel_audit::{MemoryAuditLog, MemoryEventBus, QueueConfig};
    use action_kernel_storage::MemoryExecutor;

    fn plan() -> MigrationPlan {
        let old = json!({"type": "object", "definition": {"shape": {"amount": {"type": "string"}}}});
        let new = json!({"type": "object", "definition": {"shape": {"amount": {"type": "number"}}}});
        MigrationAnalyzer::default().analyze("orders", &old, &new).unwrap()
    }

    fn engine(executor: Arc<MemoryExecutor>) -> (MigrationEngine, Arc<MemoryAuditLog>, AuditQueue) {
        let log = Arc::new(MemoryAuditLog::new());
        let (audit, _worker) = AuditQueue::spawn(log.clone(), Arc::new(MemoryEventBus::new()), QueueConfig::default());
        (MigrationEngine::new(executor, audit.clone()), log, audit)
    }

    #[tokio::test]
    async fn test_phases_run_in_order_with_audit() {
        let executor = Arc::new(MemoryExecutor::new());
        let (engine, log, audit) = engine(executor.clone());

        let report = engine.execute(&plan()).await.unwrap();
        assert_eq!(report.completed_phases, vec![0, 1, 2, 3, 4]);

        // enable_dual_write has no statement
        assert_eq!(executor.statements().len(), 4);
        assert!(executor.statements()[0].contains("ADD COLUMN amount_next"));
        assert!(!engine.dual_writes().is_active("orders"));

        audit.flush().await.unwrap();
        let entries = log.entries_for(MIGRATION_AUDIT_ACTION);
        let indexes: Vec<u64> = entries.iter().map(|e| e.payload["phaseIndex"].as_u64().unwrap()).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
        assert_eq!(entries[0].actor_id, "system:migration");
    }

    #[tokio::test]
    async fn test_failure_stops_without_compensation() {
        let executor = Arc::new(MemoryExecutor::new());
        executor.fail_when_contains("UPDATE orders");
        let (engine, log, audit) = engine(executor.clone());

        let err = engine.execute(&plan()).await.unwrap_err();
        match &err {
            MigrationError::MigrationExecution {
                phase_index, action, ..
            } => {
                assert_eq!(*phase_index, 2);
                assert_eq!(*action, PhaseAction::Backfill);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(err.completed_phases(), &[0, 1]);
        // readers were never switched back
        assert!(engine.dual_writes().is_active("orders"));
        assert!(!executor.statements().iter().any(|s| s.contains("RENAME")));

        audit.flush().await.unwrap();
        let statuses: Vec<String> = log
            .entries_for(MIGRATION_AUDIT_ACTION)
            .iter()
            .map(|e| e.payload["status"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(statuses, vec!["completed", "completed", "failed"]);
    }

    #[tokio::test]
    async fn test_resume_continues_from_failed_phase() {
        let executor = Arc::new(MemoryExecutor::new());
        let (engine, _log, _audit) = engine(executor.clone());

        let report = engine.resume(&plan(), 2).await.unwrap();
        assert_eq!(report.completed_phases, vec![2, 3, 4]);
        assert!(executor.statements()[0].starts_with("UPDATE orders"));

        assert!(matches!(
            engine.resume(&plan(), 9).await,
            Err(MigrationError::InvalidPlan(_))
        ));
    }
}
