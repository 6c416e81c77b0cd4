//! Kernel error taxonomy and its envelope codes

use action_kernel_policy::{Denial, PolicyError};
use action_kernel_registry::RegistryError;
use action_kernel_schema::{SchemaError, ValidationIssue};
use serde_json::{json, Value};
use thiserror::Error;

/// Which contract schema rejected a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStage {
    Input,
    Output,
}

/// Every way a dispatch can fail
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("No contract for action {0}")]
    ContractNotFound(String),

    #[error("Contract invalid: {0}")]
    ContractInvalid(String),

    #[error("{} validation failed with {} issue(s)", stage_name(.stage), .issues.len())]
    Validation {
        stage: ValidationStage,
        issues: Vec<ValidationIssue>,
    },

    /// RBAC, scope or data-contract denial
    #[error("Policy denied: {}", .0.reason())]
    PolicyDenied(Denial),

    #[error("Governance tier violation: {}", .violations.join(", "))]
    GovernanceTierViolation { violations: Vec<String> },

    #[error("Approval pending: {request_id}")]
    HitlApprovalPending { request_id: String },

    #[error("Approval rejected: {request_id}")]
    HitlApprovalRejected { request_id: String },

    /// Handler source matched the static deny list
    #[error("Security violation: {}", .0.join(", "))]
    SecurityViolation(Vec<String>),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Handler returned an error or panicked
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

fn stage_name(stage: &ValidationStage) -> &'static str {
    match stage {
        ValidationStage::Input => "Input",
        ValidationStage::Output => "Output",
    }
}

impl KernelError {
    /// Envelope error code
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::ActionNotFound(_) => "ACTION_NOT_FOUND",
            KernelError::ContractNotFound(_) => "CONTRACT_NOT_FOUND",
            KernelError::ContractInvalid(_) => "CONTRACT_INVALID",
            KernelError::Validation {
                stage: ValidationStage::Input,
                ..
            } => "INPUT_INVALID",
            KernelError::Validation {
                stage: ValidationStage::Output,
                ..
            } => "OUTPUT_INVALID",
            KernelError::PolicyDenied(_) => "POLICY_DENIED",
            KernelError::GovernanceTierViolation { .. } => "GOVERNANCE_TIER_VIOLATION",
            KernelError::HitlApprovalPending { .. } => "HITL_APPROVAL_PENDING",
            KernelError::HitlApprovalRejected { .. } => "HITL_APPROVAL_REJECTED",
            KernelError::SecurityViolation(_) => "SECURITY_VIOLATION",
            KernelError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            KernelError::ExecutionFailed(_) => "INTERNAL_ERROR",
        }
    }

    /// Human-facing message; execution failures stay generic
    pub fn public_message(&self) -> String {
        match self {
            KernelError::PolicyDenied(denial) => denial.message(),
            KernelError::ExecutionFailed(_) => "Action execution failed".to_string(),
            other => other.to_string(),
        }
    }

    /// Structured details safe to return to any caller
    pub fn details(&self) -> Option<Value> {
        match self {
            KernelError::Validation { issues, .. } => Some(json!({ "issues": issues })),
            KernelError::PolicyDenied(denial) => Some(json!({
                "reason": denial.reason(),
                "denial": denial,
            })),
            KernelError::GovernanceTierViolation { violations } => Some(json!({
                "reason": format!("governance_tier_violation:{}", violations.join(",")),
                "violations": violations,
            })),
            KernelError::HitlApprovalPending { request_id } => Some(json!({
                "reason": format!("hitl_pending:{}", request_id),
                "approvalRequestId": request_id,
            })),
            KernelError::HitlApprovalRejected { request_id } => Some(json!({
                "reason": format!("hitl_rejected:{}", request_id),
                "approvalRequestId": request_id,
            })),
            KernelError::SecurityViolation(rules) => Some(json!({ "rules": rules })),
            _ => None,
        }
    }

    /// Only execution failures carry internal diagnostics
    pub fn is_internal(&self) -> bool {
        matches!(self, KernelError::ExecutionFailed(_) | KernelError::StorageUnavailable(_))
    }
}

impl From<Denial> for KernelError {
    fn from(denial: Denial) -> Self {
        match denial {
            Denial::GovernanceTierViolation { violations } => {
                KernelError::GovernanceTierViolation { violations }
            }
            Denial::HitlPending { request_id } => KernelError::HitlApprovalPending { request_id },
            Denial::HitlRejected { request_id } => KernelError::HitlApprovalRejected { request_id },
            other => KernelError::PolicyDenied(other),
        }
    }
}

impl From<RegistryError> for KernelError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::StorageUnavailable(msg) => KernelError::StorageUnavailable(msg),
            RegistryError::ContractNotFound { name, .. } => KernelError::ContractNotFound(name),
            RegistryError::ContractInvalid(msg) => KernelError::ContractInvalid(msg),
            other => KernelError::ExecutionFailed(other.to_string()),
        }
    }
}

impl From<PolicyError> for KernelError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Registry(inner) => inner.into(),
            PolicyError::InvalidSubject(msg) => KernelError::Validation {
                stage: ValidationStage::Input,
                issues: vec![ValidationIssue::new(
                    "$.governance",
                    action_kernel_schema::IssueCode::InvalidType,
                    msg,
                )],
            },
            other => KernelError::ExecutionFailed(other.to_string()),
        }
    }
}

impl From<SchemaError> for KernelError {
    fn from(err: SchemaError) -> Self {
        KernelError::ContractInvalid(err.to_string())
    }
}

pub type KernelResult<T> = std::result::Result<T, KernelError>;
