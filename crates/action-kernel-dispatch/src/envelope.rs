//! Dispatch response envelope

use serde::Serialize;
use serde_json::Value;

use crate::sandbox::FrozenValue;
use crate::state::DispatchState;

/// Uniform result of one dispatch
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<FrozenValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub meta: EnvelopeMeta,
}

impl Envelope {
    pub fn success(data: FrozenValue, meta: EnvelopeMeta) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta,
        }
    }

    pub fn failure(error: ErrorInfo, meta: EnvelopeMeta) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            meta,
        }
    }

    /// Error code, if the dispatch failed
    pub fn code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Error information for failed dispatches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    /// Stable code for programmatic handling
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// `reason` field of the details, when the error carries one
    pub fn reason(&self) -> Option<&str> {
        self.details.as_ref()?.get("reason")?.as_str()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    pub execution_time_ms: u64,
    pub state: DispatchState,
    pub request_id: String,
    pub action_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_version: Option<u32>,
}
