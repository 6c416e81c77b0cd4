use action_kernel_audit::{AuditQueue, MemoryAuditLog, MemoryEventBus, QueueConfig};
use action_kernel_dispatch::{
    handler_fn, DispatchState, Dispatcher, Engine, EngineRegistry, HandlerError, KernelContext,
};
use action_kernel_policy::{CallerIdentity, PolicyEvaluator};
use action_kernel_registry::{
    AccessType, ActionContract, ActionDataContractLink, ActionKind, ContractRecord, ContractRegistry,
    ContractStatus, DataClassification, DataContract, GovernanceTier, MemoryContractStore, Sensitivity,
};
use action_kernel_storage::{MemoryExecutor, StorageExecutor};
use serde_json::{json, Value};
use std::sync::Arc;

struct Kernel {
    dispatcher: Dispatcher,
    registry: Arc<ContractRegistry>,
    audit_log: Arc<MemoryAuditLog>,
    events: Arc<MemoryEventBus>,
    audit: AuditQueue,
}

fn accounting_engine() -> Engine {
    let create = ActionContract::new("acct.create.entry", 1, ActionKind::Command)
        .with_permissions(["data.write_financial"])
        .with_input_schema(json!({
            "type": "object",
            "definition": {"shape": {
                "amount": {"type": "number", "definition": {"positive": true}},
                "memo": {"type": "optional", "definition": {"inner": {"type": "string"}}}
            }}
        }));

    Engine::new("acct")
        .handler(
            "acct.create.entry",
            handler_fn(Some(create), |ctx, input| async move {
                ctx.storage()?
                    .execute("INSERT INTO entries VALUES ($1)", &[input.clone()])
                    .await?;
                ctx.emit("acct.entry_created", input.clone()).await?;
                Ok(json!({"created": true, "amount": input["amount"]}))
            }),
        )
        .handler(
            "acct.run.script",
            handler_fn(
                Some(ActionContract::new("acct.run.script", 1, ActionKind::Command)),
                |_ctx, _input| async move { Ok(json!(null)) },
            )
            .with_source("const cp = require('child_process'); cp.execSync(input.cmd)"),
        )
        .handler(
            "acct.crash.now",
            handler_fn(
                Some(ActionContract::new("acct.crash.now", 1, ActionKind::Query)),
                |_ctx, _input| async move {
                    if true {
                        panic!("ledger corrupted");
                    }
                    Ok(json!(null))
                },
            ),
        )
        .handler(
            "acct.list.drafts",
            handler_fn(None, |_ctx, _input| async move { Err(HandlerError::failed("unreachable")) }),
        )
}

fn metadata_engine() -> Engine {
    let create = ActionContract::new("metadata.create.entity", 1, ActionKind::Command).with_tags(["governed"]);
    Engine::new("metadata").handler(
        "metadata.create.entity",
        handler_fn(Some(create), |ctx, input| async move {
            Ok(json!({
                "name": input["name"],
                "approval": ctx.approval(),
            }))
        }),
    )
}

fn kernel() -> Kernel {
    let registry = Arc::new(ContractRegistry::new(Arc::new(MemoryContractStore::new())));
    let audit_log = Arc::new(MemoryAuditLog::new());
    let events = Arc::new(MemoryEventBus::new());
    let (audit, _worker) = AuditQueue::spawn(audit_log.clone(), events.clone(), QueueConfig::default());

    let engines = EngineRegistry::new()
        .with_engine(accounting_engine())
        .unwrap()
        .with_engine(metadata_engine())
        .unwrap();
    let storage: Arc<dyn StorageExecutor> = Arc::new(MemoryExecutor::new());
    let context = KernelContext::new(registry.clone(), engines)
        .with_policy(PolicyEvaluator::new(registry.clone()).with_audit(audit.clone()))
        .with_audit(audit.clone())
        .with_storage(storage);

    Kernel {
        dispatcher: Dispatcher::new(Arc::new(context)),
        registry,
        audit_log,
        events,
        audit,
    }
}

fn reason(envelope: &action_kernel_dispatch::Envelope) -> Option<String> {
    envelope.error.as_ref().and_then(|e| e.reason()).map(str::to_string)
}

#[tokio::test]
async fn test_missing_permission_is_denied() {
    let k = kernel();
    let caller = CallerIdentity::new(Some("t1"), "alice").with_permissions(["execute_action"]);

    let envelope = k
        .dispatcher
        .dispatch("acct.create.entry", json!({"amount": 10}), &caller)
        .await;

    assert!(!envelope.success);
    assert_eq!(envelope.code(), Some("POLICY_DENIED"));
    assert_eq!(reason(&envelope).as_deref(), Some("missing_permissions:data.write_financial"));
    assert_eq!(envelope.meta.state, DispatchState::Denied);
    assert_eq!(envelope.meta.contract_version, Some(1));

    k.audit.flush().await.unwrap();
    let entries = k.audit_log.entries_for("acct.create.entry");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload["decision"], "deny");
}

#[tokio::test]
async fn test_financial_write_scope_is_required() {
    let k = kernel();
    k.registry
        .register_data_contract(
            Some("t1"),
            &DataContract::new("gl-entries", DataClassification::Financial, Sensitivity::Internal, GovernanceTier::Tier2),
        )
        .await
        .unwrap();
    k.registry
        .link_data_contract(
            Some("t1"),
            &ActionDataContractLink::new("acct.create.entry", "gl-entries", AccessType::Write),
        )
        .await
        .unwrap();

    let caller = CallerIdentity::new(Some("t1"), "alice")
        .with_permissions(["execute_action", "data.write_financial"]);
    let envelope = k
        .dispatcher
        .dispatch("acct.create.entry", json!({"amount": 10}), &caller)
        .await;
    assert_eq!(envelope.code(), Some("POLICY_DENIED"));
    assert_eq!(reason(&envelope).as_deref(), Some("missing_scopes:data:financial:write"));

    let caller = caller.with_scopes(["data:financial:write"]);
    let envelope = k
        .dispatcher
        .dispatch("acct.create.entry", json!({"amount": 10, "memo": "rent", "junk": 1}), &caller)
        .await;
    assert!(envelope.success, "{:?}", envelope.error);
    assert_eq!(envelope.meta.state, DispatchState::Completed);
    assert_eq!(*envelope.data.unwrap(), json!({"created": true, "amount": 10}));

    k.audit.flush().await.unwrap();
    assert_eq!(k.events.events_named("acct.entry_created").len(), 1);
    assert!(k.events.events_named("acct.entry_created")[0].payload.get("junk").is_none());
}

#[tokio::test]
async fn test_tier_1_entity_without_ownership_is_rejected() {
    let k = kernel();
    let caller = CallerIdentity::new(Some("t1"), "alice").with_permissions(["metadata.write"]);
    let input = json!({
        "name": "general_ledger",
        "governance": {
            "urn": "urn:entity:general_ledger",
            "tier": "tier_1",
            "hasLineage": true,
            "hasProfiling": true,
            "standardPackRefs": ["ifrs-9"]
        }
    });

    let envelope = k.dispatcher.dispatch("metadata.create.entity", input, &caller).await;

    assert_eq!(envelope.code(), Some("GOVERNANCE_TIER_VIOLATION"));
    let details = envelope.error.as_ref().unwrap().details.as_ref().unwrap();
    assert_eq!(details["violations"], json!(["missing_owner", "missing_steward"]));
    assert_eq!(envelope.meta.state, DispatchState::Denied);
}

#[tokio::test]
async fn test_tier_4_entity_is_auto_approved() {
    let k = kernel();
    let caller = CallerIdentity::new(Some("t1"), "alice").with_permissions(["metadata.write"]);
    let input = json!({
        "name": "scratch",
        "governance": {"tier": "tier_4"}
    });

    let envelope = k.dispatcher.dispatch("metadata.create.entity", input, &caller).await;

    assert!(envelope.success, "{:?}", envelope.error);
    let data = envelope.data.unwrap();
    assert!(data["approval"].as_str().unwrap().starts_with("auto-approved-"));
}

#[tokio::test]
async fn test_malformed_governance_subject_is_input_invalid() {
    let k = kernel();
    let caller = CallerIdentity::new(Some("t1"), "alice").with_permissions(["metadata.write"]);
    let input = json!({"governance": {"tier": "tier_9"}});

    let envelope = k.dispatcher.dispatch("metadata.create.entity", input, &caller).await;
    assert_eq!(envelope.code(), Some("INPUT_INVALID"));
    assert_eq!(envelope.meta.state, DispatchState::InputInvalid);
}

#[tokio::test]
async fn test_deny_listed_source_never_runs() {
    let k = kernel();
    let caller = CallerIdentity::new(Some("t1"), "alice").with_permissions(["execute_action"]);

    let envelope = k.dispatcher.dispatch("acct.run.script", json!({"cmd": "ls"}), &caller).await;

    assert_eq!(envelope.code(), Some("SECURITY_VIOLATION"));
    let rules = &envelope.error.unwrap().details.unwrap()["rules"];
    assert!(rules.as_array().unwrap().contains(&json!("process_spawn")));
    assert!(envelope.meta.contract_version.is_none());
}

#[tokio::test]
async fn test_panicking_handler_is_contained() {
    let k = kernel();
    let caller = CallerIdentity::new(None, "alice").with_permissions(["execute_action"]);

    let envelope = k.dispatcher.dispatch("acct.crash.now", json!({}), &caller).await;

    assert_eq!(envelope.code(), Some("INTERNAL_ERROR"));
    assert_eq!(envelope.meta.state, DispatchState::ExecFailed);
    assert!(envelope.error.unwrap().details.is_none());
}

#[tokio::test]
async fn test_contract_comes_from_registry_or_is_missing() {
    let k = kernel();
    let caller = CallerIdentity::new(Some("t1"), "alice").with_permissions(["execute_action"]);

    let envelope = k.dispatcher.dispatch("acct.list.drafts", json!({}), &caller).await;
    assert_eq!(envelope.code(), Some("CONTRACT_NOT_FOUND"));

    let contract = ActionContract::new("acct.list.drafts", 3, ActionKind::Query).with_output_schema(json!({
        "type": "object",
        "definition": {"shape": {"drafts": {"type": "array", "definition": {"items": {"type": "string"}}}}}
    }));
    let record = ContractRecord::from_action(Some("t1"), &contract).unwrap();
    k.registry.register(record, false).await.unwrap();

    // drafts are not resolvable
    let envelope = k.dispatcher.dispatch("acct.list.drafts", json!({}), &caller).await;
    assert_eq!(envelope.code(), Some("CONTRACT_NOT_FOUND"));

    k.registry
        .activate(Some("t1"), action_kernel_registry::ContractType::Action, "acct.list.drafts", 3)
        .await
        .unwrap();
    let envelope = k.dispatcher.dispatch("acct.list.drafts", json!({}), &caller).await;
    assert_eq!(envelope.meta.contract_version, Some(3));
    assert_eq!(envelope.code(), Some("INTERNAL_ERROR"));
}

#[tokio::test]
async fn test_global_records_do_not_leak_into_tenants() {
    let k = kernel();
    let contract = ActionContract::new("acct.list.drafts", 1, ActionKind::Query);
    let record = ContractRecord::from_action(None, &contract)
        .unwrap()
        .with_status(ContractStatus::Active);
    k.registry.register(record, false).await.unwrap();

    let tenant = CallerIdentity::new(Some("t1"), "alice").with_permissions(["execute_action"]);
    let envelope = k.dispatcher.dispatch("acct.list.drafts", Value::Null, &tenant).await;
    assert_eq!(envelope.code(), Some("CONTRACT_NOT_FOUND"));

    let global = CallerIdentity::new(None, "alice").with_permissions(["execute_action"]);
    let envelope = k.dispatcher.dispatch("acct.list.drafts", Value::Null, &global).await;
    assert_eq!(envelope.meta.contract_version, Some(1));
}
