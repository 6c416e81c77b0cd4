//! Audit entries, events and the collaborator traits that receive them

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AuditResult;

/// One append-only audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    /// `None` for platform-level records
    pub tenant_id: Option<String>,
    pub actor_id: String,
    /// Action or subsystem operation the entry describes
    pub action_id: String,
    pub payload: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: Option<&str>,
        actor_id: impl Into<String>,
        action_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.map(str::to_string),
            actor_id: actor_id.into(),
            action_id: action_id.into(),
            payload,
            recorded_at: Utc::now(),
        }
    }
}

/// A named notification for the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: Uuid,
    pub name: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}

/// Durable audit trail
///
/// The record id is stable across retries, so sinks can deduplicate.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append_audit_entry(&self, entry: &AuditEntry) -> AuditResult<()>;
}

/// Event bus for notifications such as drift detection
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: &EventRecord) -> AuditResult<()>;
}
