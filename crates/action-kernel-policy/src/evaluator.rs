//! Three-stage policy evaluation
//!
//! 1. RBAC prefix table plus contract permissions
//! 2. Scopes demanded by linked data contracts
//! 3. Governance tier compliance and HITL, for governed mutations
//!
//! Stages run in order and the first denial short-circuits. Every decision
//! is written to the audit trail.

use action_kernel_audit::AuditQueue;
use action_kernel_registry::{ActionContract, ContractRegistry};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

use crate::caller::CallerIdentity;
use crate::error::PolicyResult;
use crate::governance::{GovernanceGate, GovernanceOutcome, GovernanceSubject};
use crate::hitl::MemoryApprovalStore;
use crate::rbac::RbacPolicy;
use crate::scopes::required_scopes;

/// Tag that opts a mutating contract into the governance stage
pub const GOVERNED_TAG: &str = "governed";

/// Violation reported when a governed mutation carries no governance subject
pub const MISSING_SUBJECT: &str = "missing_governance_subject";

/// Why a call was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Denial {
    MissingPermissions {
        required: Vec<String>,
        missing: Vec<String>,
    },
    MissingScopes {
        required: Vec<String>,
        missing: Vec<String>,
    },
    MissingDataContract {
        data_contract_id: String,
    },
    GovernanceTierViolation {
        violations: Vec<String>,
    },
    HitlPending {
        request_id: String,
    },
    HitlRejected {
        request_id: String,
    },
}

impl Denial {
    pub fn kind(&self) -> &'static str {
        match self {
            Denial::MissingPermissions { .. } => "missing_permissions",
            Denial::MissingScopes { .. } => "missing_scopes",
            Denial::MissingDataContract { .. } => "missing_data_contract",
            Denial::GovernanceTierViolation { .. } => "governance_tier_violation",
            Denial::HitlPending { .. } => "hitl_pending",
            Denial::HitlRejected { .. } => "hitl_rejected",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Denial::MissingPermissions { missing, .. } | Denial::MissingScopes { missing, .. } => {
                missing.join(",")
            }
            Denial::MissingDataContract { data_contract_id } => data_contract_id.clone(),
            Denial::GovernanceTierViolation { violations } => violations.join(","),
            Denial::HitlPending { request_id } | Denial::HitlRejected { request_id } => {
                request_id.clone()
            }
        }
    }

    /// Machine-parseable `<kind>:<detail>`
    pub fn reason(&self) -> String {
        format!("{}:{}", self.kind(), self.detail())
    }

    pub fn message(&self) -> String {
        match self {
            Denial::MissingPermissions { missing, .. } => {
                format!("Caller lacks required permissions: {}", missing.join(", "))
            }
            Denial::MissingScopes { missing, .. } => {
                format!("Caller lacks required data scopes: {}", missing.join(", "))
            }
            Denial::MissingDataContract { data_contract_id } => {
                format!("Linked data contract '{}' could not be resolved", data_contract_id)
            }
            Denial::GovernanceTierViolation { violations } => {
                format!("Governance tier requirements not met: {}", violations.join(", "))
            }
            Denial::HitlPending { request_id } => {
                format!("Awaiting human approval (request {})", request_id)
            }
            Denial::HitlRejected { request_id } => {
                format!("Approval request {} was rejected or expired", request_id)
            }
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow {
        /// Approval id or auto-approval sentinel for governed calls
        approval: Option<String>,
    },
    Deny(Denial),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow { .. })
    }
}

/// Everything the evaluator needs about one call
#[derive(Debug, Clone, Copy)]
pub struct PolicyRequest<'a> {
    pub action_id: &'a str,
    pub contract: &'a ActionContract,
    pub caller: &'a CallerIdentity,
    pub input: &'a Value,
}

pub struct PolicyEvaluator {
    rbac: RbacPolicy,
    registry: Arc<ContractRegistry>,
    governance: GovernanceGate,
    audit: Option<AuditQueue>,
}

impl PolicyEvaluator {
    /// Evaluator with the built-in RBAC table and an in-process approval store
    pub fn new(registry: Arc<ContractRegistry>) -> Self {
        Self {
            rbac: RbacPolicy::builtin(),
            registry,
            governance: GovernanceGate::new(Arc::new(MemoryApprovalStore::new())),
            audit: None,
        }
    }

    pub fn with_rbac(mut self, rbac: RbacPolicy) -> Self {
        self.rbac = rbac;
        self
    }

    pub fn with_governance(mut self, governance: GovernanceGate) -> Self {
        self.governance = governance;
        self
    }

    pub fn with_audit(mut self, audit: AuditQueue) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn rbac(&self) -> &RbacPolicy {
        &self.rbac
    }

    pub async fn evaluate(&self, request: PolicyRequest<'_>) -> PolicyResult<PolicyDecision> {
        let result = self.run_stages(&request).await;
        if let Ok(decision) = &result {
            self.audit_decision(&request, decision).await;
        }
        result
    }

    async fn run_stages(&self, request: &PolicyRequest<'_>) -> PolicyResult<PolicyDecision> {
        if let Some(denial) = self.check_permissions(request) {
            return Ok(PolicyDecision::Deny(denial));
        }
        if let Some(denial) = self.check_scopes(request).await? {
            return Ok(PolicyDecision::Deny(denial));
        }
        self.check_governance(request).await
    }

    fn check_permissions(&self, request: &PolicyRequest<'_>) -> Option<Denial> {
        let access = request.contract.kind.access_type();
        let required = self
            .rbac
            .required_permissions(request.action_id, access, &request.contract.permissions);
        let missing: Vec<String> = required
            .iter()
            .filter(|p| !request.caller.has_permission(p))
            .cloned()
            .collect();

        if missing.is_empty() {
            None
        } else {
            Some(Denial::MissingPermissions { required, missing })
        }
    }

    async fn check_scopes(&self, request: &PolicyRequest<'_>) -> PolicyResult<Option<Denial>> {
        let tenant = request.caller.tenant();
        let links = self.registry.links_for_action(tenant, request.action_id).await?;

        let mut required: Vec<String> = Vec::new();
        for link in &links {
            let Some(contract) = self.registry.data_contract(tenant, &link.data_contract_id).await? else {
                return Ok(Some(Denial::MissingDataContract {
                    data_contract_id: link.data_contract_id.clone(),
                }));
            };
            for scope in required_scopes(&contract, link.access_type) {
                if !required.contains(&scope) {
                    required.push(scope);
                }
            }
        }

        let missing: Vec<String> = required
            .iter()
            .filter(|s| !request.caller.has_scope(s))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Denial::MissingScopes { required, missing }))
        }
    }

    async fn check_governance(&self, request: &PolicyRequest<'_>) -> PolicyResult<PolicyDecision> {
        if !request.contract.kind.is_mutating() || !request.contract.has_tag(GOVERNED_TAG) {
            return Ok(PolicyDecision::Allow { approval: None });
        }
        let Some(subject) = GovernanceSubject::from_input(request.input)? else {
            return Ok(PolicyDecision::Deny(Denial::GovernanceTierViolation {
                violations: vec![MISSING_SUBJECT.to_string()],
            }));
        };

        let outcome = self
            .governance
            .evaluate(
                &subject,
                request.caller.tenant(),
                &request.caller.actor_id,
                request.action_id,
            )
            .await?;

        Ok(match outcome {
            GovernanceOutcome::Approved(approval) => PolicyDecision::Allow {
                approval: Some(approval),
            },
            GovernanceOutcome::Violations(violations) => {
                PolicyDecision::Deny(Denial::GovernanceTierViolation { violations })
            }
            GovernanceOutcome::Pending(request_id) => {
                PolicyDecision::Deny(Denial::HitlPending { request_id })
            }
            GovernanceOutcome::Rejected(request_id) => {
                PolicyDecision::Deny(Denial::HitlRejected { request_id })
            }
        })
    }

    async fn audit_decision(&self, request: &PolicyRequest<'_>, decision: &PolicyDecision) {
        let payload = match decision {
            PolicyDecision::Allow { approval } => {
                tracing::debug!(action_id = request.action_id, actor = %request.caller.actor_id, "Policy allowed");
                json!({
                    "decision": "allow",
                    "contractVersion": request.contract.version,
                    "approval": approval,
                })
            }
            PolicyDecision::Deny(denial) => {
                tracing::warn!(
                    action_id = request.action_id,
                    tenant = request.caller.tenant().unwrap_or("global"),
                    actor = %request.caller.actor_id,
                    reason = %denial.reason(),
                    "Policy denied"
                );
                json!({
                    "decision": "deny",
                    "contractVersion": request.contract.version,
                    "reason": denial.reason(),
                    "denial": denial,
                })
            }
        };

        if let Some(audit) = &self.audit {
            if let Err(e) = audit
                .append(
                    request.caller.tenant(),
                    &request.caller.actor_id,
                    request.action_id,
                    payload,
                )
                .await
            {
                tracing::warn!(action_id = request.action_id, error = %e, "Policy decision not audited");
            }
        }
    }
}
