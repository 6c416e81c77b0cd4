//! Axum extractor for the caller identity set by the upstream gateway.
//!
//! Reads `x-tenant-id`, `x-actor-id`, `x-permissions` and `x-scopes`.
//! Permissions and scopes are comma-separated lists. Requests without an
//! actor are rejected with `400 BAD_REQUEST`.

use action_kernel_policy::CallerIdentity;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";
pub const PERMISSIONS_HEADER: &str = "x-permissions";
pub const SCOPES_HEADER: &str = "x-scopes";

pub struct CallerExtractor(pub CallerIdentity);

pub struct CallerRejection {
    message: String,
}

impl IntoResponse for CallerRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "MISSING_CALLER_IDENTITY",
                "message": self.message
            })),
        )
            .into_response()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn header_list(headers: &HeaderMap, name: &str) -> Vec<String> {
    header(headers, name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerExtractor {
    type Rejection = CallerRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let actor = header(headers, ACTOR_HEADER).ok_or_else(|| CallerRejection {
            message: "X-Actor-Id header is required".to_string(),
        })?;

        let caller = CallerIdentity::new(header(headers, TENANT_HEADER), actor)
            .with_permissions(header_list(headers, PERMISSIONS_HEADER))
            .with_scopes(header_list(headers, SCOPES_HEADER));

        Ok(Self(caller))
    }
}
