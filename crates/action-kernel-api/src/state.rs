//! Startup wiring
//!
//! [`Kernel::build`] turns a [`KernelConfig`] and a set of collaborators into
//! the shared [`AppState`] served by the router. Storage reads go through a
//! dual-reader proxy so that tables under dual-write are drift-checked.

use action_kernel_audit::{AuditQueue, AuditSink, EventBus, MemoryAuditLog, MemoryEventBus};
use action_kernel_dispatch::{Dispatcher, KernelContext};
use action_kernel_migration::{DualReaderProxy, DualWriteRegistry, MigrationAnalyzer, MigrationEngine};
use action_kernel_policy::{GovernanceGate, MemoryApprovalStore, PolicyEvaluator};
use action_kernel_registry::{ContractRegistry, MemoryContractStore};
use action_kernel_storage::{CacheTier, MemoryCache, MemoryExecutor, StorageExecutor};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

use crate::builtin::builtin_engines;
use crate::config::KernelConfig;
use crate::error::ServerResult;
use crate::metrics::MetricsRegistry;
use crate::routes::create_router;

/// External systems the kernel talks to
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn StorageExecutor>,
    pub cache: Arc<dyn CacheTier>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub event_bus: Arc<dyn EventBus>,
}

impl Collaborators {
    /// In-process collaborators for local runs
    pub fn in_memory() -> Self {
        Self {
            storage: Arc::new(MemoryExecutor::new()),
            cache: Arc::new(MemoryCache::new()),
            audit_sink: Arc::new(MemoryAuditLog::new()),
            event_bus: Arc::new(MemoryEventBus::new()),
        }
    }
}

/// State shared by every route
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<MetricsRegistry>,
    pub approvals: Arc<MemoryApprovalStore>,
    pub audit: AuditQueue,
    pub analyzer: MigrationAnalyzer,
    pub migrations: Arc<MigrationEngine>,
    pub start_time: Instant,
}

pub struct Kernel {
    state: AppState,
    dual_writes: Arc<DualWriteRegistry>,
    audit_worker: JoinHandle<()>,
}

impl Kernel {
    /// Assemble the kernel; must be called inside a tokio runtime
    pub fn build(config: &KernelConfig, collaborators: Collaborators) -> ServerResult<Self> {
        config.validate()?;

        let (audit, audit_worker) = AuditQueue::spawn(
            collaborators.audit_sink,
            collaborators.event_bus,
            config.queue_config(),
        );

        let registry = Arc::new(
            ContractRegistry::new(Arc::new(MemoryContractStore::new()))
                .with_cache(Arc::clone(&collaborators.cache))
                .with_ttl(config.cache_ttl()),
        );

        let approvals = Arc::new(MemoryApprovalStore::new());
        let policy = PolicyEvaluator::new(Arc::clone(&registry))
            .with_governance(GovernanceGate::new(approvals.clone()))
            .with_audit(audit.clone());

        let dual_writes = Arc::new(DualWriteRegistry::new());
        let reader = DualReaderProxy::new(Arc::clone(&collaborators.storage), Arc::clone(&dual_writes), audit.clone())
            .with_shadow_suffix(config.migration.shadow_suffix.clone());
        let migrations = MigrationEngine::new(Arc::clone(&collaborators.storage), audit.clone())
            .with_dual_writes(Arc::clone(&dual_writes));

        let context = KernelContext::new(Arc::clone(&registry), builtin_engines()?)
            .with_policy(policy)
            .with_audit(audit.clone())
            .with_storage(Arc::new(reader))
            .with_cache(collaborators.cache)
            .with_dev_diagnostics(config.dev_diagnostics);

        tracing::info!(
            context = ?context,
            cache_ttl_secs = config.registry.cache_ttl_secs,
            shadow_suffix = %config.migration.shadow_suffix,
            "Kernel assembled"
        );

        let state = AppState {
            dispatcher: Arc::new(Dispatcher::new(Arc::new(context))),
            metrics: Arc::new(MetricsRegistry::new()?),
            approvals,
            audit,
            analyzer: MigrationAnalyzer::new(config.migration_settings()),
            migrations: Arc::new(migrations),
            start_time: Instant::now(),
        };

        Ok(Self {
            state,
            dual_writes,
            audit_worker,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn dual_writes(&self) -> &Arc<DualWriteRegistry> {
        &self.dual_writes
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Drain the audit queue and stop its worker
    pub async fn shutdown(self) {
        if let Err(e) = self.state.audit.flush().await {
            tracing::warn!(error = %e, "Audit queue not drained on shutdown");
        }
        let Self { state, audit_worker, .. } = self;
        drop(state);
        // handles cloned into live routers keep the worker running
        if !audit_worker.is_finished() {
            audit_worker.abort();
        }
        tracing::info!("Kernel stopped");
    }
}
