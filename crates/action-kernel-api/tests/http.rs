use action_kernel_api::builtin::{ENTITY_CREATED_EVENT, ENTITY_TABLE, TIER_CHANGED_EVENT};
use action_kernel_api::{Collaborators, Kernel, KernelConfig};
use action_kernel_audit::{MemoryAuditLog, MemoryEventBus};
use action_kernel_storage::{MemoryCache, MemoryExecutor};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct Harness {
    kernel: Kernel,
    router: Router,
    storage: Arc<MemoryExecutor>,
    audit_log: Arc<MemoryAuditLog>,
    events: Arc<MemoryEventBus>,
}

fn harness() -> Harness {
    let storage = Arc::new(MemoryExecutor::new());
    let audit_log = Arc::new(MemoryAuditLog::new());
    let events = Arc::new(MemoryEventBus::new());
    let collaborators = Collaborators {
        storage: storage.clone(),
        cache: Arc::new(MemoryCache::new()),
        audit_sink: audit_log.clone(),
        event_bus: events.clone(),
    };
    let kernel = Kernel::build(&KernelConfig::default(), collaborators).unwrap();
    let router = kernel.router();
    Harness {
        kernel,
        router,
        storage,
        audit_log,
        events,
    }
}

const ADMIN: &[&str] = &["metadata.write", "metadata.read", "registry.read", "governance.manage"];

fn post(uri: &str, permissions: &[&str], body: Value) -> Request<Body> {
    post_as("t1", "alice", uri, permissions, body)
}

fn post_as(tenant: &str, actor: &str, uri: &str, permissions: &[&str], body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-tenant-id", tenant)
        .header("x-actor-id", actor)
        .header("x-permissions", permissions.join(","))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_as(tenant: &str, actor: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-tenant-id", tenant)
        .header("x-actor-id", actor)
        .body(Body::empty())
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn entity(name: &str, governance: Value) -> Value {
    json!({
        "name": name,
        "schema": {"type": "object", "definition": {"shape": {"id": {"type": "string"}}}},
        "governance": governance
    })
}

#[tokio::test]
async fn test_health() {
    let h = harness();
    let (status, body) = send(
        &h.router,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["actions"], 4);
    assert_eq!(body["components"]["registry"], true);
}

#[tokio::test]
async fn test_missing_actor_is_bad_request() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/actions/registry/list.contracts")
        .body(Body::from("{}"))
        .unwrap();

    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "MISSING_CALLER_IDENTITY");
}

#[tokio::test]
async fn test_unknown_action_and_bad_json() {
    let h = harness();
    let (status, body) = send(&h.router, post("/actions/billing/refund.order", ADMIN, json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "ACTION_NOT_FOUND");
    assert_eq!(body["meta"]["state"], "DENIED");

    let request = Request::builder()
        .method("POST")
        .uri("/actions/registry/list.contracts")
        .header("x-actor-id", "alice")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_registry_query_needs_read_permission() {
    let h = harness();
    let (status, body) = send(
        &h.router,
        post("/actions/registry/list.contracts", &["execute_action"], json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "POLICY_DENIED");
    assert_eq!(body["error"]["details"]["reason"], "missing_permissions:registry.read");
}

#[tokio::test]
async fn test_create_entity_auto_approved_at_tier_4() {
    let h = harness();
    let (status, body) = send(
        &h.router,
        post("/actions/metadata/create.entity", ADMIN, entity("orders", json!({"tier": "tier_4"}))),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["version"], 1);
    assert!(body["data"]["approval"].as_str().unwrap().starts_with("auto-approved-"));
    assert_eq!(body["meta"]["state"], "COMPLETED");
    assert_eq!(h.storage.table(ENTITY_TABLE).len(), 1);

    let (status, body) = send(
        &h.router,
        post("/actions/registry/list.contracts", ADMIN, json!({"contractType": "entity"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["contracts"][0]["name"], "orders");
    assert_eq!(body["data"]["contracts"][0]["status"], "active");

    h.kernel.state().audit.flush().await.unwrap();
    assert_eq!(h.events.events_named(ENTITY_CREATED_EVENT).len(), 1);
    assert!(h
        .audit_log
        .entries_for("metadata.create.entity")
        .iter()
        .any(|e| e.payload["decision"] == "allow"));
}

#[tokio::test]
async fn test_invalid_entity_name_is_unprocessable() {
    let h = harness();
    let (status, body) = send(
        &h.router,
        post("/actions/metadata/create.entity", ADMIN, entity("Bad Name", json!({"tier": "tier_5"}))),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INPUT_INVALID");
    assert_eq!(body["meta"]["state"], "INPUT_INVALID");
}

#[tokio::test]
async fn test_tier_1_without_ownership_is_forbidden() {
    let h = harness();
    let governance = json!({
        "tier": "tier_1",
        "hasLineage": true,
        "hasProfiling": true,
        "standardPackRefs": ["ifrs-9"]
    });
    let (status, body) = send(
        &h.router,
        post("/actions/metadata/create.entity", ADMIN, entity("ledger", governance)),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "GOVERNANCE_TIER_VIOLATION");
    assert_eq!(body["error"]["details"]["violations"], json!(["missing_owner", "missing_steward"]));
    assert!(h.storage.table(ENTITY_TABLE).is_empty());
}

#[tokio::test]
async fn test_tier_upgrade_waits_for_approval() {
    let h = harness();
    let (status, _) = send(
        &h.router,
        post("/actions/metadata/create.entity", ADMIN, entity("orders", json!({"tier": "tier_4"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mut upgrade = json!({
        "name": "orders",
        "governance": {
            "tier": "tier_3",
            "currentTier": "tier_4",
            "hasLineage": true,
            "owner": "sales-data",
            "steward": "jane"
        }
    });
    let (status, body) = send(&h.router, post("/actions/metadata/update.tier", ADMIN, upgrade.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["error"]["code"], "HITL_APPROVAL_PENDING");
    let request_id = body["error"]["details"]["approvalRequestId"].as_str().unwrap().to_string();

    // still pending
    upgrade["governance"]["approvalRequestId"] = json!(request_id);
    let (status, _) = send(&h.router, post("/actions/metadata/update.tier", ADMIN, upgrade.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let decision_uri = format!("/approvals/{}/decision", request_id);
    let (status, _) = send(&h.router, post(&decision_uri, ADMIN, json!({"decision": "approve"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &h.router,
        post_as("t1", "bob", &decision_uri, &["governance.approve"], json!({"decision": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");

    let (status, body) = send(&h.router, post("/actions/metadata/update.tier", ADMIN, upgrade.clone())).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["version"], 2);
    assert_eq!(body["data"]["tier"], "tier_3");
    assert_eq!(body["data"]["approval"], json!(request_id));

    // the approval was spent by the update above
    let (status, body) = send(&h.router, post("/actions/metadata/update.tier", ADMIN, upgrade)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "HITL_APPROVAL_REJECTED");

    let (_, body) = send(
        &h.router,
        post(
            "/actions/registry/describe.contract",
            ADMIN,
            json!({"name": "orders", "contractType": "entity"}),
        ),
    )
    .await;
    assert_eq!(body["data"]["contract"]["version"], 2);
    assert_eq!(body["data"]["schema"]["tier"], "tier_3");
    assert_eq!(body["data"]["fields"][0]["name"], "id");

    // a decided request cannot be decided again
    let (status, _) = send(
        &h.router,
        post_as("t1", "bob", &decision_uri, &["governance.approve"], json!({"decision": "reject", "reason": "late"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    h.kernel.state().audit.flush().await.unwrap();
    assert_eq!(h.events.events_named(TIER_CHANGED_EVENT).len(), 1);
}

#[tokio::test]
async fn test_approval_polling() {
    let h = harness();
    let request = Request::builder()
        .uri("/approvals/does-not-exist")
        .header("x-actor-id", "alice")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

async fn pending_tier_2_entity(h: &Harness) -> String {
    let governance = json!({
        "urn": "urn:entity:invoices",
        "tier": "tier_2",
        "hasLineage": true,
        "hasProfiling": true,
        "owner": "billing",
        "steward": "jane"
    });
    let (status, body) = send(
        &h.router,
        post("/actions/metadata/create.entity", ADMIN, entity("invoices", governance)),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{}", body);
    body["error"]["details"]["approvalRequestId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_requester_cannot_approve_own_request() {
    let h = harness();
    let request_id = pending_tier_2_entity(&h).await;
    let decision_uri = format!("/approvals/{}/decision", request_id);

    let (status, body) = send(
        &h.router,
        post(&decision_uri, &["governance.approve"], json!({"decision": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "POLICY_DENIED");

    let (status, body) = send(&h.router, get_as("t1", "alice", &format!("/approvals/{}", request_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["approvers"], json!([]));
}

#[tokio::test]
async fn test_approvals_are_tenant_scoped() {
    let h = harness();
    let request_id = pending_tier_2_entity(&h).await;
    let approval_uri = format!("/approvals/{}", request_id);
    let decision_uri = format!("{}/decision", approval_uri);

    let (status, _) = send(&h.router, get_as("t2", "bob", &approval_uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &h.router,
        post_as("t2", "bob", &decision_uri, &["governance.approve"], json!({"decision": "approve"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&h.router, get_as("t1", "bob", &approval_uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["targetTier"], "tier_2");
}

#[tokio::test]
async fn test_approval_does_not_transfer_to_another_entity() {
    let h = harness();
    let request_id = pending_tier_2_entity(&h).await;
    let (status, _) = send(
        &h.router,
        post_as(
            "t1",
            "bob",
            &format!("/approvals/{}/decision", request_id),
            &["governance.approve"],
            json!({"decision": "approve"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let governance = json!({
        "urn": "urn:entity:payroll",
        "tier": "tier_2",
        "hasLineage": true,
        "hasProfiling": true,
        "owner": "hr",
        "steward": "mallory",
        "approvalRequestId": request_id
    });
    let (status, body) = send(
        &h.router,
        post_as("t1", "mallory", "/actions/metadata/create.entity", ADMIN, entity("payroll", governance)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "HITL_APPROVAL_REJECTED");
    assert!(h.storage.table(ENTITY_TABLE).is_empty());
}

#[tokio::test]
async fn test_migration_plan_and_execute() {
    let h = harness();
    let old = json!({"type": "object", "definition": {"shape": {"id": {"type": "string"}}}});
    let new = json!({"type": "object", "definition": {"shape": {"id": {"type": "string"}, "email": {"type": "string"}}}});
    let body = json!({"entity": "customers", "old": old, "new": new});

    let (status, plan) = send(&h.router, post("/migrations/plan", &[], body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plan["data"]["strategy"], "dual-write");
    assert_eq!(plan["data"]["phases"].as_array().unwrap().len(), 5);

    let (status, _) = send(&h.router, post("/migrations/execute", &[], body.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    h.storage.fail_when_contains("SET NOT NULL");
    let (status, failed) = send(&h.router, post("/migrations/execute", &["migration.execute"], body.clone())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(failed["error"]["code"], "MIGRATION_EXECUTION_FAILED");
    assert_eq!(failed["error"]["details"]["completedPhases"], json!([0, 1, 2]));
    assert!(h.kernel.dual_writes().is_active("customers"));
}

#[tokio::test]
async fn test_metrics_count_dispatches() {
    let h = harness();
    send(&h.router, post("/actions/registry/list.contracts", &["execute_action"], json!({}))).await;
    send(&h.router, post("/actions/registry/list.contracts", ADMIN, json!({}))).await;

    let response = h
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("action_kernel_dispatches_total{code=\"OK\"} 1"));
    assert!(text.contains("action_kernel_dispatches_total{code=\"POLICY_DENIED\"} 1"));
    assert!(text.contains("action_kernel_audit_queue{kind=\"dropped\"} 0"));
}
