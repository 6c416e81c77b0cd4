//! Human-in-the-loop approval requests

use action_kernel_registry::{GovernanceTier, RiskBand};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::error::{PolicyError, PolicyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    /// Not decided within the approval timeout; treated as rejected
    Expired,
}

impl ApprovalStatus {
    pub fn is_decided(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// What the policy evaluator asks a human to approve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewApprovalRequest {
    pub tenant_id: Option<String>,
    pub actor_id: String,
    pub action_id: String,
    pub subject_urn: Option<String>,
    /// Tier the entity will have once the change is applied
    pub target_tier: GovernanceTier,
    /// Tier before the change; absent on creation
    pub current_tier: Option<GovernanceTier>,
    pub risk_band: RiskBand,
    pub reason: String,
    pub min_approvals: u32,
    pub timeout_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub tenant_id: Option<String>,
    pub actor_id: String,
    pub action_id: String,
    pub subject_urn: Option<String>,
    pub target_tier: GovernanceTier,
    pub current_tier: Option<GovernanceTier>,
    pub risk_band: RiskBand,
    pub reason: String,
    pub min_approvals: u32,
    pub approvers: Vec<String>,
    pub status: ApprovalStatus,
    pub rejection_reason: Option<String>,
    /// Set once an approved request has authorized its mutation
    #[serde(default)]
    pub consumed: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Status as of `now`, accounting for expiry of pending requests
    pub fn status_at(&self, now: DateTime<Utc>) -> ApprovalStatus {
        if self.status == ApprovalStatus::Pending && now >= self.expires_at {
            ApprovalStatus::Expired
        } else {
            self.status
        }
    }
}

/// HITL collaborator
#[async_trait]
pub trait HitlService: Send + Sync {
    async fn create_request(&self, request: NewApprovalRequest) -> PolicyResult<ApprovalRequest>;

    /// Current view of a request, with expiry applied
    async fn get_request(&self, id: &str) -> PolicyResult<Option<ApprovalRequest>>;

    /// Spend an approved request. Returns `false` when it is not approved or
    /// was already spent; only one caller ever sees `true`.
    async fn consume(&self, id: &str) -> PolicyResult<bool>;
}

/// In-process approval store
///
/// Creation is safe from concurrent dispatches. Once a request is approved,
/// rejected or expired, later decisions fail with `ApprovalClosed`. The
/// requesting actor cannot approve their own request.
#[derive(Debug, Default)]
pub struct MemoryApprovalStore {
    requests: RwLock<HashMap<String, ApprovalRequest>>,
}

impl MemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one approval; the request flips to approved once
    /// `min_approvals` distinct approvers have signed off
    pub fn approve(&self, id: &str, approver: &str) -> PolicyResult<ApprovalStatus> {
        self.decide(id, |request| {
            if request.actor_id == approver {
                return Err(PolicyError::SelfApproval {
                    id: request.id.clone(),
                    actor: approver.to_string(),
                });
            }
            if !request.approvers.iter().any(|a| a == approver) {
                request.approvers.push(approver.to_string());
            }
            if request.approvers.len() as u32 >= request.min_approvals.max(1) {
                request.status = ApprovalStatus::Approved;
            }
            Ok(())
        })
    }

    pub fn reject(&self, id: &str, approver: &str, reason: &str) -> PolicyResult<ApprovalStatus> {
        self.decide(id, |request| {
            request.approvers.push(approver.to_string());
            request.rejection_reason = Some(reason.to_string());
            request.status = ApprovalStatus::Rejected;
            Ok(())
        })
    }

    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let now = Utc::now();
        self.requests
            .read()
            .map(|r| {
                r.values()
                    .filter(|req| req.status_at(now) == ApprovalStatus::Pending)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn decide<F>(&self, id: &str, apply: F) -> PolicyResult<ApprovalStatus>
    where
        F: FnOnce(&mut ApprovalRequest) -> PolicyResult<()>,
    {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| PolicyError::collaborator("hitl", "approval store lock poisoned"))?;
        let request = requests
            .get_mut(id)
            .ok_or_else(|| PolicyError::ApprovalNotFound(id.to_string()))?;

        let current = request.status_at(Utc::now());
        if current.is_decided() {
            request.status = current;
            return Err(PolicyError::ApprovalClosed {
                id: id.to_string(),
                status: current,
            });
        }

        apply(request)?;
        tracing::info!(
            request_id = id,
            status = %request.status,
            approvals = request.approvers.len(),
            "Approval request updated"
        );
        Ok(request.status)
    }
}

#[async_trait]
impl HitlService for MemoryApprovalStore {
    async fn create_request(&self, request: NewApprovalRequest) -> PolicyResult<ApprovalRequest> {
        let now = Utc::now();
        let created = ApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id,
            actor_id: request.actor_id,
            action_id: request.action_id,
            subject_urn: request.subject_urn,
            target_tier: request.target_tier,
            current_tier: request.current_tier,
            risk_band: request.risk_band,
            reason: request.reason,
            min_approvals: request.min_approvals,
            approvers: Vec::new(),
            status: ApprovalStatus::Pending,
            rejection_reason: None,
            consumed: false,
            created_at: now,
            expires_at: now + Duration::hours(i64::from(request.timeout_hours)),
        };

        self.requests
            .write()
            .map_err(|_| PolicyError::collaborator("hitl", "approval store lock poisoned"))?
            .insert(created.id.clone(), created.clone());

        tracing::info!(
            request_id = %created.id,
            action_id = %created.action_id,
            risk_band = %created.risk_band,
            "Approval request created"
        );
        Ok(created)
    }

    async fn get_request(&self, id: &str) -> PolicyResult<Option<ApprovalRequest>> {
        let now = Utc::now();
        let requests = self
            .requests
            .read()
            .map_err(|_| PolicyError::collaborator("hitl", "approval store lock poisoned"))?;
        Ok(requests.get(id).map(|r| {
            let mut view = r.clone();
            view.status = r.status_at(now);
            view
        }))
    }

    async fn consume(&self, id: &str) -> PolicyResult<bool> {
        let mut requests = self
            .requests
            .write()
            .map_err(|_| PolicyError::collaborator("hitl", "approval store lock poisoned"))?;
        let Some(request) = requests.get_mut(id) else {
            return Ok(false);
        };
        if request.status != ApprovalStatus::Approved || request.consumed {
            return Ok(false);
        }
        request.consumed = true;
        tracing::info!(request_id = id, "Approval request consumed");
        Ok(true)
    }
}
