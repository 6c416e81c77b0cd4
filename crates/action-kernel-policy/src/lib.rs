//! Policy evaluation for the action contract kernel
//!
//! Decides whether a caller may invoke an action, combining the RBAC prefix
//! table, data-contract scopes and tiered governance with human approval.
//! Denials carry a machine-parseable `<kind>:<detail>` reason.

pub mod caller;
pub mod error;
pub mod evaluator;
pub mod governance;
pub mod hitl;
pub mod rbac;
pub mod scopes;

pub use caller::CallerIdentity;
pub use error::{PolicyError, PolicyResult};
pub use evaluator::{Denial, PolicyDecision, PolicyEvaluator, PolicyRequest, GOVERNED_TAG};
pub use governance::{
    approval_risk_band, GovernanceGate, GovernanceOutcome, GovernanceSubject, ImpactAnalyzer,
    ImpactAssessment, LineageService, ProfilingService, Recommendation, TierChange,
};
pub use hitl::{ApprovalRequest, ApprovalStatus, HitlService, MemoryApprovalStore, NewApprovalRequest};
pub use rbac::{RbacPolicy, RbacRule, DEFAULT_PERMISSION};
pub use scopes::required_scopes;
