use action_kernel_audit::{AuditQueue, MemoryAuditLog, MemoryEventBus, QueueConfig};
use action_kernel_migration::{
    DualReaderProxy, DualWriteRegistry, MigrationAnalyzer, MigrationEngine, MigrationStrategy, PhaseAction,
    DRIFT_EVENT,
};
use action_kernel_storage::{MemoryExecutor, Row, StorageExecutor};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

fn customer_schema(with_email: bool) -> Value {
    let mut shape = json!({
        "id": {"type": "string", "definition": {"format": "uuid"}},
        "name": {"type": "string"}
    });
    if with_email {
        shape["email"] = json!({"type": "string", "definition": {"format": "email"}});
    }
    json!({"type": "object", "definition": {"shape": shape}})
}

fn rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| json!({"id": i, "name": format!("customer-{}", i)}).as_object().cloned().unwrap())
        .collect()
}

struct Harness {
    executor: Arc<MemoryExecutor>,
    proxy: DualReaderProxy,
    dual_writes: Arc<DualWriteRegistry>,
    audit_log: Arc<MemoryAuditLog>,
    events: Arc<MemoryEventBus>,
    audit: AuditQueue,
}

fn harness() -> Harness {
    let executor = Arc::new(MemoryExecutor::new());
    let audit_log = Arc::new(MemoryAuditLog::new());
    let events = Arc::new(MemoryEventBus::new());
    let (audit, _worker) = AuditQueue::spawn(audit_log.clone(), events.clone(), QueueConfig::default());
    let dual_writes = Arc::new(DualWriteRegistry::new());
    let proxy = DualReaderProxy::new(executor.clone(), dual_writes.clone(), audit.clone());
    Harness {
        executor,
        proxy,
        dual_writes,
        audit_log,
        events,
        audit,
    }
}

#[test]
fn test_new_required_field_plans_dual_write() {
    let plan = MigrationAnalyzer::default()
        .analyze("customers", &customer_schema(false), &customer_schema(true))
        .unwrap();

    assert_eq!(plan.strategy, MigrationStrategy::DualWrite);
    assert_eq!(plan.change_labels(), vec!["new_required_field:email"]);
    let actions: Vec<PhaseAction> = plan.phases.iter().map(|p| p.action).collect();
    assert_eq!(
        actions,
        vec![
            PhaseAction::AddShadowColumns,
            PhaseAction::EnableDualWrite,
            PhaseAction::Backfill,
            PhaseAction::SwitchReaders,
            PhaseAction::DropOldColumns,
        ]
    );
    assert_eq!(
        plan.phases[0].statement.as_deref(),
        Some("ALTER TABLE customers ADD COLUMN email TEXT NULL")
    );
    assert!(!plan.phases[2].rollback_supported);
    assert!(!plan.phases[4].rollback_supported);

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["strategy"], "dual-write");
    assert_eq!(json["breakingChanges"][0]["kind"], "new_required_field");
    assert_eq!(json["phases"][1]["duration"], json!({"kind": "days", "days": 7}));
}

#[tokio::test]
async fn test_identical_shadow_rows_show_no_drift() {
    let h = harness();
    h.executor.put_table("customers", rows(10));
    h.executor.put_table("customers_shadow", rows(10));
    h.dual_writes.enable("customers");

    let result = h.proxy.query("SELECT * FROM customers", &[]).await.unwrap();
    assert_eq!(result.row_count, 10);
    assert!(h.executor.statements().contains(&"SELECT * FROM customers_shadow".to_string()));

    h.audit.flush().await.unwrap();
    assert!(h.events.events_named(DRIFT_EVENT).is_empty());
    assert!(h.audit_log.entries().is_empty());
}

#[tokio::test]
async fn test_dual_read_matches_table_regardless_of_case() {
    let h = harness();
    h.executor.put_table("customers", rows(3));
    h.executor.put_table("customers_shadow", rows(3));
    h.dual_writes.enable("Customers");

    let result = h.proxy.query("select id from customers", &[]).await.unwrap();
    assert_eq!(result.row_count, 3);
    assert!(h.executor.statements().contains(&"select id from customers_shadow".to_string()));
}

#[tokio::test]
async fn test_missing_shadow_row_is_drift() {
    let h = harness();
    h.executor.put_table("customers", rows(10));
    let mut shadow = rows(10);
    shadow.remove(9);
    h.executor.put_table("customers_shadow", shadow);
    h.dual_writes.enable("customers");

    let result = h.proxy.query("SELECT * FROM customers", &[]).await.unwrap();
    // callers always see the original table
    assert_eq!(result.row_count, 10);

    h.audit.flush().await.unwrap();
    let events = h.events.events_named(DRIFT_EVENT);
    assert_eq!(events.len(), 1);
    let record = &events[0].payload;
    assert_eq!(record["driftDetected"], true);
    assert_eq!(record["oldRows"], 10);
    assert_eq!(record["newRows"], 9);
    assert!(record["differences"][0].as_str().unwrap().starts_with("row_count_mismatch"));
    assert_eq!(h.audit_log.entries().len(), 1);
}

#[tokio::test]
async fn test_failed_shadow_read_counts_as_empty() {
    let h = harness();
    h.executor.put_table("customers", rows(2));
    h.executor.fail_when_contains("customers_shadow");
    h.dual_writes.enable("customers");

    let result = h.proxy.query("SELECT * FROM customers", &[]).await.unwrap();
    assert_eq!(result.row_count, 2);

    h.audit.flush().await.unwrap();
    let events = h.events.events_named(DRIFT_EVENT);
    assert_eq!(events[0].payload["newRows"], 0);
}

#[tokio::test]
async fn test_tables_outside_dual_write_read_once() {
    let h = harness();
    h.executor.put_table("customers", rows(3));

    h.proxy.query("SELECT * FROM customers", &[]).await.unwrap();
    assert_eq!(h.executor.statements(), vec!["SELECT * FROM customers"]);
}

#[tokio::test]
async fn test_engine_toggles_dual_read() {
    let h = harness();
    let plan = MigrationAnalyzer::default()
        .analyze("customers", &customer_schema(false), &customer_schema(true))
        .unwrap();
    let engine = MigrationEngine::new(h.executor.clone(), h.audit.clone()).with_dual_writes(h.dual_writes.clone());

    // stop before readers switch
    let mut partial = plan.clone();
    partial.phases.truncate(3);
    engine.execute(&partial).await.unwrap();
    assert!(h.dual_writes.is_active("customers"));

    engine.resume(&plan, 3).await.unwrap();
    assert!(!h.dual_writes.is_active("customers"));
}

proptest! {
    #[test]
    fn analyze_is_deterministic(
        fields in proptest::collection::btree_map("[a-z]{1,8}", (0usize..4, any::<bool>()), 0..6),
        dropped in proptest::collection::btree_set("[a-z]{1,8}", 0..3),
    ) {
        let kinds = ["string", "number", "boolean", "date"];
        let shape = |skip: &std::collections::BTreeSet<String>, flip: bool| {
            let mut map = serde_json::Map::new();
            for (name, (kind, optional)) in &fields {
                if skip.contains(name) {
                    continue;
                }
                let base = json!({"type": kinds[(*kind + flip as usize) % kinds.len()]});
                let node = if *optional {
                    json!({"type": "optional", "definition": {"inner": base}})
                } else {
                    base
                };
                map.insert(name.clone(), node);
            }
            json!({"type": "object", "definition": {"shape": Value::Object(map)}})
        };

        let old = shape(&std::collections::BTreeSet::new(), false);
        let new = shape(&dropped, true);

        let analyzer = MigrationAnalyzer::default();
        let first = analyzer.analyze("entity", &old, &new).unwrap();
        let second = analyzer.analyze("entity", &old, &new).unwrap();
        prop_assert_eq!(&first, &second);

        let expected_phases = if first.breaking_changes.is_empty() { 1 } else { 5 };
        prop_assert_eq!(first.phases.len(), expected_phases);
    }
}
