//! Route definitions for the kernel HTTP surface
//!
//! - POST /actions/:domain/:action - dispatch an action, responds with the envelope
//! - GET /approvals/:id - poll a HITL approval request
//! - POST /approvals/:id/decision - approve or reject a pending request
//! - POST /migrations/plan - plan a schema migration
//! - POST /migrations/execute - plan and run a schema migration
//! - GET /health - health check
//! - GET /metrics - prometheus text exposition

use action_kernel_dispatch::{Envelope, ErrorInfo};
use action_kernel_migration::{MigrationError, MigrationPlan};
use action_kernel_policy::{ApprovalRequest, CallerIdentity, HitlService, PolicyError};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::extract::CallerExtractor;
use crate::state::AppState;

/// Permission required to decide approval requests
pub const APPROVE_PERMISSION: &str = "governance.approve";

/// Permission required to run migrations
pub const MIGRATE_PERMISSION: &str = "migration.execute";

/// Response wrapper for routes other than dispatch
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: String,
}

impl ResponseMeta {
    fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: ResponseMeta::new(),
        }
    }

    pub fn error(error: ErrorInfo) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            meta: ResponseMeta::new(),
        }
    }
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    MigrationFailed { reason: String, completed: Vec<usize> },
    InternalError(String),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Forbidden(_) => "POLICY_DENIED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::MigrationFailed { .. } => "MIGRATION_EXECUTION_FAILED",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::MigrationFailed { .. } | ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_info = match &self {
            ApiError::BadRequest(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InternalError(msg) => ErrorInfo::new(self.error_code(), msg.clone()),
            ApiError::MigrationFailed { reason, completed } => ErrorInfo::new(self.error_code(), reason.clone())
                .with_details(json!({ "completedPhases": completed })),
        };

        (status, Json(ApiResponse::<()>::error(error_info))).into_response()
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::ApprovalNotFound(_) => ApiError::NotFound(err.to_string()),
            PolicyError::ApprovalClosed { .. } => ApiError::Conflict(err.to_string()),
            PolicyError::SelfApproval { ref id, .. } => ApiError::Forbidden(format!("self_approval:{}", id)),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<MigrationError> for ApiError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::MigrationExecution { .. } => ApiError::MigrationFailed {
                completed: err.completed_phases().to_vec(),
                reason: err.to_string(),
            },
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

/// HTTP status for a dispatch envelope
pub fn envelope_status(envelope: &Envelope) -> StatusCode {
    match envelope.code() {
        None => StatusCode::OK,
        Some("INPUT_INVALID") => StatusCode::UNPROCESSABLE_ENTITY,
        Some("POLICY_DENIED" | "GOVERNANCE_TIER_VIOLATION" | "SECURITY_VIOLATION" | "HITL_APPROVAL_REJECTED") => {
            StatusCode::FORBIDDEN
        }
        Some("HITL_APPROVAL_PENDING") => StatusCode::ACCEPTED,
        Some("ACTION_NOT_FOUND" | "CONTRACT_NOT_FOUND") => StatusCode::NOT_FOUND,
        Some("STORAGE_UNAVAILABLE") => StatusCode::SERVICE_UNAVAILABLE,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Create the router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/actions/:domain/:action", post(dispatch_action))
        .route("/approvals/:id", get(get_approval))
        .route("/approvals/:id/decision", post(decide_approval))
        .route("/migrations/plan", post(plan_migration))
        .route("/migrations/execute", post(execute_migration))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /actions/:domain/:action
///
/// The body is the raw action input; an empty body is `null`.
pub async fn dispatch_action(
    State(state): State<AppState>,
    Path((domain, action)): Path<(String, String)>,
    CallerExtractor(caller): CallerExtractor,
    body: Bytes,
) -> Response {
    let input: Value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => return ApiError::BadRequest(format!("request body is not valid JSON: {}", e)).into_response(),
        }
    };

    let action_id = format!("{}.{}", domain, action);
    let start = Instant::now();
    let envelope = state.dispatcher.dispatch(&action_id, input, &caller).await;
    state
        .metrics
        .dispatch()
        .record_dispatch(envelope.code(), start.elapsed().as_secs_f64());

    (envelope_status(&envelope), Json(envelope)).into_response()
}

/// Approval request visible to the caller; other tenants' requests are not found
async fn tenant_approval(state: &AppState, id: &str, caller: &CallerIdentity) -> Result<ApprovalRequest, ApiError> {
    match state.approvals.get_request(id).await? {
        Some(request) if request.tenant_id.as_deref() == caller.tenant() => Ok(request),
        Some(_) => {
            tracing::warn!(
                request_id = %id,
                tenant = caller.tenant().unwrap_or("global"),
                actor = %caller.actor_id,
                "Approval request belongs to another tenant"
            );
            Err(ApiError::NotFound(format!("Approval request not found: {}", id)))
        }
        None => Err(ApiError::NotFound(format!("Approval request not found: {}", id))),
    }
}

/// GET /approvals/:id
pub async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CallerExtractor(caller): CallerExtractor,
) -> Result<Json<ApiResponse<ApprovalRequest>>, ApiError> {
    let request = tenant_approval(&state, &id, &caller).await?;
    Ok(Json(ApiResponse::success(request)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /approvals/:id/decision
///
/// The deciding actor is the caller.
pub async fn decide_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
    CallerExtractor(caller): CallerExtractor,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    if !caller.has_permission(APPROVE_PERMISSION) {
        return Err(ApiError::Forbidden(format!("missing_permissions:{}", APPROVE_PERMISSION)));
    }
    tenant_approval(&state, &id, &caller).await?;

    let status = match request.decision {
        Decision::Approve => state.approvals.approve(&id, &caller.actor_id)?,
        Decision::Reject => {
            let reason = request.reason.as_deref().unwrap_or("rejected");
            state.approvals.reject(&id, &caller.actor_id, reason)?
        }
    };

    tracing::info!(
        request_id = %id,
        approver = %caller.actor_id,
        decision = ?request.decision,
        status = %status,
        "Approval decision recorded"
    );
    Ok(Json(ApiResponse::success(json!({ "id": id, "status": status }))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
    pub entity: String,
    pub old: Value,
    pub new: Value,
    /// Phase to start from when resuming a failed run
    #[serde(default)]
    pub from_phase: usize,
}

/// POST /migrations/plan
pub async fn plan_migration(
    State(state): State<AppState>,
    CallerExtractor(_caller): CallerExtractor,
    Json(request): Json<MigrationRequest>,
) -> Result<Json<ApiResponse<MigrationPlan>>, ApiError> {
    let plan = state.analyzer.analyze(&request.entity, &request.old, &request.new)?;
    Ok(Json(ApiResponse::success(plan)))
}

/// POST /migrations/execute
///
/// Plans the migration and runs it from `fromPhase`. A failed phase is
/// reported with the phases already applied; nothing is rolled back.
pub async fn execute_migration(
    State(state): State<AppState>,
    CallerExtractor(caller): CallerExtractor,
    Json(request): Json<MigrationRequest>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    if !caller.has_permission(MIGRATE_PERMISSION) {
        return Err(ApiError::Forbidden(format!("missing_permissions:{}", MIGRATE_PERMISSION)));
    }

    let plan = state.analyzer.analyze(&request.entity, &request.old, &request.new)?;
    let report = state.migrations.resume(&plan, request.from_phase).await?;
    Ok(Json(ApiResponse::success(json!({ "plan": plan, "report": report }))))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub registry: bool,
    pub audit_queue: bool,
    pub actions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub components: ComponentHealth,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub version: String,
}

/// GET /health
///
/// Degraded when the registry has no backing store or audit entries have
/// been dropped.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let context = state.dispatcher.context();
    let registry = !context.registry().is_reduced();
    let audit_queue = state.audit.stats().dropped() == 0;

    let status = if registry && audit_queue {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    Json(HealthResponse {
        status,
        components: ComponentHealth {
            registry,
            audit_queue,
            actions: context.engines().actions().len(),
        },
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.metrics.dispatch().observe_audit(state.audit.stats());
    let body = state
        .metrics
        .encode_text()
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use action_kernel_dispatch::{DispatchState, EnvelopeMeta};

    fn failed(code: &str) -> Envelope {
        let meta = EnvelopeMeta {
            execution_time_ms: 0,
            state: DispatchState::Denied,
            request_id: "r".to_string(),
            action_id: "a.b".to_string(),
            contract_version: None,
        };
        Envelope::failure(ErrorInfo::new(code, "x"), meta)
    }

    #[test]
    fn test_envelope_status_mapping() {
        assert_eq!(envelope_status(&failed("INPUT_INVALID")), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(envelope_status(&failed("POLICY_DENIED")), StatusCode::FORBIDDEN);
        assert_eq!(envelope_status(&failed("GOVERNANCE_TIER_VIOLATION")), StatusCode::FORBIDDEN);
        assert_eq!(envelope_status(&failed("HITL_APPROVAL_PENDING")), StatusCode::ACCEPTED);
        assert_eq!(envelope_status(&failed("ACTION_NOT_FOUND")), StatusCode::NOT_FOUND);
        assert_eq!(envelope_status(&failed("STORAGE_UNAVAILABLE")), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(envelope_status(&failed("OUTPUT_INVALID")), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(envelope_status(&failed("INTERNAL_ERROR")), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_responses() {
        let error = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.error_code(), "BAD_REQUEST");

        let error: ApiError = PolicyError::ApprovalNotFound("req-1".to_string()).into();
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);

        let error: ApiError = PolicyError::SelfApproval {
            id: "req-1".to_string(),
            actor: "alice".to_string(),
        }
        .into();
        assert_eq!(error.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(error.error_code(), "POLICY_DENIED");

        let error: ApiError = MigrationError::InvalidPlan("bad".to_string()).into();
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }
}
