//! Governance tier compliance and HITL gating
//!
//! Applies to mutating actions on tiered metadata entities. The entity being
//! created or changed is described by a [`GovernanceSubject`] carried in the
//! action input under `governance`.

use action_kernel_registry::{GovernanceTier, RiskBand};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{PolicyError, PolicyResult};
use crate::hitl::{ApprovalRequest, ApprovalStatus, HitlService, NewApprovalRequest};

/// Impact score at or above which the approval risk band is bumped
pub const HIGH_IMPACT_SCORE: u32 = 70;

/// Input key holding the governance subject
pub const SUBJECT_KEY: &str = "governance";

/// The tiered entity a governed mutation touches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceSubject {
    #[serde(default)]
    pub urn: Option<String>,
    /// Tier the entity will have after the call
    pub tier: GovernanceTier,
    /// Tier the entity has now; absent on creation
    #[serde(default)]
    pub current_tier: Option<GovernanceTier>,
    #[serde(default)]
    pub has_lineage: bool,
    #[serde(default)]
    pub has_profiling: bool,
    #[serde(default)]
    pub standard_pack_refs: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub steward: Option<String>,
    /// Set when polling a previously created approval request
    #[serde(default)]
    pub approval_request_id: Option<String>,
}

impl GovernanceSubject {
    pub fn new(tier: GovernanceTier) -> Self {
        Self {
            urn: None,
            tier,
            current_tier: None,
            has_lineage: false,
            has_profiling: false,
            standard_pack_refs: Vec::new(),
            owner: None,
            steward: None,
            approval_request_id: None,
        }
    }

    /// Read the subject from an action input; `None` when absent
    pub fn from_input(input: &Value) -> PolicyResult<Option<Self>> {
        match input.get(SUBJECT_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| PolicyError::InvalidSubject(e.to_string())),
        }
    }

    pub fn tier_change(&self) -> Option<TierChange> {
        match self.current_tier {
            Some(from) if from != self.tier => Some(TierChange { from, to: self.tier }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierChange {
    pub from: GovernanceTier,
    pub to: GovernanceTier,
}

impl TierChange {
    /// Moving to a stricter tier
    pub fn is_upgrade(&self) -> bool {
        self.to.is_stricter_than(self.from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Proceed,
    Review,
    Block,
}

/// Result of an impact analysis on the subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactAssessment {
    /// 0 to 100
    pub risk_score: u32,
    pub recommendation: Recommendation,
}

#[async_trait]
pub trait LineageService: Send + Sync {
    async fn has_lineage(&self, urn: &str) -> PolicyResult<bool>;
}

#[async_trait]
pub trait ProfilingService: Send + Sync {
    async fn has_profile(&self, urn: &str) -> PolicyResult<bool>;
}

#[async_trait]
pub trait ImpactAnalyzer: Send + Sync {
    async fn assess(&self, subject: &GovernanceSubject) -> PolicyResult<ImpactAssessment>;
}

/// Approval risk band for a tier, adjusted by impact
pub fn approval_risk_band(tier: GovernanceTier, impact: Option<&ImpactAssessment>) -> RiskBand {
    let base = match tier {
        GovernanceTier::Tier1 => RiskBand::High,
        GovernanceTier::Tier2 => RiskBand::Medium,
        _ => RiskBand::Low,
    };
    match impact {
        Some(i) if i.recommendation == Recommendation::Block => RiskBand::Critical,
        Some(i) if i.risk_score >= HIGH_IMPACT_SCORE || i.recommendation == Recommendation::Review => {
            base.bump()
        }
        _ => base,
    }
}

/// Outcome of the governance stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceOutcome {
    /// Carries the approval id, or an `auto-approved-<millis>` sentinel
    Approved(String),
    Violations(Vec<String>),
    Pending(String),
    Rejected(String),
}

/// Tier compliance checks plus approval gating
pub struct GovernanceGate {
    hitl: Arc<dyn HitlService>,
    lineage: Option<Arc<dyn LineageService>>,
    profiling: Option<Arc<dyn ProfilingService>>,
    impact: Option<Arc<dyn ImpactAnalyzer>>,
}

impl GovernanceGate {
    pub fn new(hitl: Arc<dyn HitlService>) -> Self {
        Self {
            hitl,
            lineage: None,
            profiling: None,
            impact: None,
        }
    }

    pub fn with_lineage(mut self, lineage: Arc<dyn LineageService>) -> Self {
        self.lineage = Some(lineage);
        self
    }

    pub fn with_profiling(mut self, profiling: Arc<dyn ProfilingService>) -> Self {
        self.profiling = Some(profiling);
        self
    }

    pub fn with_impact(mut self, impact: Arc<dyn ImpactAnalyzer>) -> Self {
        self.impact = Some(impact);
        self
    }

    /// Missing artifacts for `tier`, in a fixed order
    pub async fn compliance_violations(&self, subject: &GovernanceSubject, tier: GovernanceTier) -> Vec<String> {
        let req = tier.requirements();
        let mut violations = Vec::new();

        if req.requires_lineage && !self.lineage_present(subject).await {
            violations.push("missing_lineage".to_string());
        }
        if req.requires_profiling && !self.profiling_present(subject).await {
            violations.push("missing_profiling".to_string());
        }
        if req.requires_standard_pack && subject.standard_pack_refs.is_empty() {
            violations.push("missing_standard_pack".to_string());
        }
        if req.requires_ownership {
            if is_blank(&subject.owner) {
                violations.push("missing_owner".to_string());
            }
            if is_blank(&subject.steward) {
                violations.push("missing_steward".to_string());
            }
        }
        violations
    }

    async fn lineage_present(&self, subject: &GovernanceSubject) -> bool {
        match (&self.lineage, &subject.urn) {
            (Some(lineage), Some(urn)) => match lineage.has_lineage(urn).await {
                Ok(present) => present,
                Err(e) => {
                    tracing::warn!(urn = %urn, error = %e, "Lineage lookup failed, treating as missing");
                    false
                }
            },
            _ => subject.has_lineage,
        }
    }

    async fn profiling_present(&self, subject: &GovernanceSubject) -> bool {
        match (&self.profiling, &subject.urn) {
            (Some(profiling), Some(urn)) => match profiling.has_profile(urn).await {
                Ok(present) => present,
                Err(e) => {
                    tracing::warn!(urn = %urn, error = %e, "Profiling lookup failed, treating as missing");
                    false
                }
            },
            _ => subject.has_profiling,
        }
    }

    /// Run compliance and approval gating for one governed call
    pub async fn evaluate(
        &self,
        subject: &GovernanceSubject,
        tenant_id: Option<&str>,
        actor_id: &str,
        action_id: &str,
    ) -> PolicyResult<GovernanceOutcome> {
        let change = subject.tier_change();

        // downgrades skip compliance
        let check_compliance = change.map_or(true, |c| c.is_upgrade());
        if check_compliance {
            let violations = self.compliance_violations(subject, subject.tier).await;
            if !violations.is_empty() {
                return Ok(GovernanceOutcome::Violations(violations));
            }
        }

        let requirements = subject.tier.requirements();
        if !requirements.requires_hitl && change.is_none() {
            let sentinel = format!("auto-approved-{}", chrono::Utc::now().timestamp_millis());
            return Ok(GovernanceOutcome::Approved(sentinel));
        }

        if let Some(id) = &subject.approval_request_id {
            match self.hitl.get_request(id).await? {
                Some(request) => return self.poll(request, subject, tenant_id, actor_id, action_id).await,
                None => {
                    tracing::warn!(
                        request_id = %id,
                        action_id = action_id,
                        "Unknown approval request, creating a new one"
                    );
                }
            }
        }

        let impact = match &self.impact {
            Some(analyzer) => match analyzer.assess(subject).await {
                Ok(assessment) => Some(assessment),
                Err(e) => {
                    tracing::warn!(error = %e, "Impact analysis failed, using tier risk band");
                    None
                }
            },
            None => None,
        };
        let risk_band = approval_risk_band(subject.tier, impact.as_ref());

        let reason = match change {
            Some(c) => format!("governance tier change {} -> {}", c.from, c.to),
            None => format!("{} mutation requires approval", subject.tier),
        };
        let timeout_hours = match requirements.approval_timeout_hours {
            0 => GovernanceTier::Tier1.requirements().approval_timeout_hours,
            hours => hours,
        };

        let request = self
            .hitl
            .create_request(NewApprovalRequest {
                tenant_id: tenant_id.map(str::to_string),
                actor_id: actor_id.to_string(),
                action_id: action_id.to_string(),
                subject_urn: subject.urn.clone(),
                target_tier: subject.tier,
                current_tier: subject.current_tier,
                risk_band,
                reason,
                min_approvals: requirements.min_approvals.max(1),
                timeout_hours,
            })
            .await?;

        Ok(GovernanceOutcome::Pending(request.id))
    }

    /// Outcome of an existing approval request presented by this call
    ///
    /// The request only authorizes the exact change it was raised for, by
    /// the actor who raised it, and only once.
    async fn poll(
        &self,
        request: ApprovalRequest,
        subject: &GovernanceSubject,
        tenant_id: Option<&str>,
        actor_id: &str,
        action_id: &str,
    ) -> PolicyResult<GovernanceOutcome> {
        if !approval_matches(&request, subject, tenant_id, actor_id, action_id) {
            tracing::warn!(
                request_id = %request.id,
                action_id = action_id,
                actor = actor_id,
                "Approval request does not cover this call"
            );
            return Ok(GovernanceOutcome::Rejected(request.id));
        }

        Ok(match request.status {
            ApprovalStatus::Approved => {
                if self.hitl.consume(&request.id).await? {
                    GovernanceOutcome::Approved(request.id)
                } else {
                    tracing::warn!(request_id = %request.id, action_id = action_id, "Approval request already used");
                    GovernanceOutcome::Rejected(request.id)
                }
            }
            ApprovalStatus::Pending => GovernanceOutcome::Pending(request.id),
            ApprovalStatus::Rejected | ApprovalStatus::Expired => GovernanceOutcome::Rejected(request.id),
        })
    }
}

fn approval_matches(
    request: &ApprovalRequest,
    subject: &GovernanceSubject,
    tenant_id: Option<&str>,
    actor_id: &str,
    action_id: &str,
) -> bool {
    request.action_id == action_id
        && request.tenant_id.as_deref() == tenant_id
        && request.actor_id == actor_id
        && request.subject_urn == subject.urn
        && request.target_tier == subject.tier
        && request.current_tier == subject.current_tier
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hitl::MemoryApprovalStore;
    use mockall::mock;

    mock! {
        Lineage {}

        #[async_trait]
        impl LineageService for Lineage {
            async fn has_lineage(&self, urn: &str) -> PolicyResult<bool>;
        }
    }

    mock! {
        Impact {}

        #[async_trait]
        impl ImpactAnalyzer for Impact {
            async fn assess(&self, subject: &GovernanceSubject) -> PolicyResult<ImpactAssessment>;
        }
    }

    fn compliant(tier: GovernanceTier) -> GovernanceSubject {
        GovernanceSubject {
            urn: Some("urn:entity:gl".into()),
            has_lineage: true,
            has_profiling: true,
            standard_pack_refs: vec!["ifrs-9".into()],
            owner: Some("finance".into()),
            steward: Some("controller".into()),
            ..GovernanceSubject::new(tier)
        }
    }

    async fn create_as(gate: &GovernanceGate, subject: &GovernanceSubject, tenant: &str, actor: &str) -> GovernanceOutcome {
        gate.evaluate(subject, Some(tenant), actor, "metadata.create.entity").await.unwrap()
    }

    fn gate() -> (GovernanceGate, Arc<MemoryApprovalStore>) {
        let store = Arc::new(MemoryApprovalStore::new());
        (GovernanceGate::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_missing_ownership_lists_both() {
        let (gate, _) = gate();
        let subject = GovernanceSubject {
            owner: None,
            steward: Some("  ".into()),
            ..compliant(GovernanceTier::Tier1)
        };
        let outcome = gate.evaluate(&subject, Some("t1"), "alice", "metadata.create.entity").await.unwrap();
        assert_eq!(
            outcome,
            GovernanceOutcome::Violations(vec!["missing_owner".into(), "missing_steward".into()])
        );
    }

    #[tokio::test]
    async fn test_tier_4_auto_approved() {
        let (gate, store) = gate();
        let outcome = gate
            .evaluate(&GovernanceSubject::new(GovernanceTier::Tier4), None, "alice", "metadata.create.entity")
            .await
            .unwrap();
        match outcome {
            GovernanceOutcome::Approved(id) => assert!(id.starts_with("auto-approved-")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(store.pending().is_empty());
    }

    #[tokio::test]
    async fn test_downgrade_skips_compliance_but_needs_approval() {
        let (gate, store) = gate();
        let subject = GovernanceSubject {
            current_tier: Some(GovernanceTier::Tier1),
            ..GovernanceSubject::new(GovernanceTier::Tier3)
        };
        let outcome = gate.evaluate(&subject, None, "alice", "metadata.update.tier").await.unwrap();
        assert!(matches!(outcome, GovernanceOutcome::Pending(_)));
        assert_eq!(store.pending()[0].risk_band, RiskBand::Low);
    }

    #[tokio::test]
    async fn test_upgrade_checks_target_tier() {
        let (gate, _) = gate();
        let subject = GovernanceSubject {
            current_tier: Some(GovernanceTier::Tier3),
            ..GovernanceSubject::new(GovernanceTier::Tier1)
        };
        let outcome = gate.evaluate(&subject, None, "alice", "metadata.update.tier").await.unwrap();
        assert_eq!(
            outcome,
            GovernanceOutcome::Violations(vec![
                "missing_lineage".into(),
                "missing_profiling".into(),
                "missing_standard_pack".into(),
                "missing_owner".into(),
                "missing_steward".into(),
            ])
        );

        let subject = GovernanceSubject {
            current_tier: Some(GovernanceTier::Tier3),
            ..compliant(GovernanceTier::Tier1)
        };
        let outcome = gate.evaluate(&subject, None, "alice", "metadata.update.tier").await.unwrap();
        assert!(matches!(outcome, GovernanceOutcome::Pending(_)));
    }

    #[tokio::test]
    async fn test_polling_resolves_request() {
        let (gate, store) = gate();
        let subject = compliant(GovernanceTier::Tier2);
        let GovernanceOutcome::Pending(id) = gate
            .evaluate(&subject, Some("t1"), "alice", "metadata.create.entity")
            .await
            .unwrap()
        else {
            panic!("expected pending");
        };

        let polling = GovernanceSubject {
            approval_request_id: Some(id.clone()),
            ..subject.clone()
        };
        assert_eq!(
            gate.evaluate(&polling, Some("t1"), "alice", "metadata.create.entity").await.unwrap(),
            GovernanceOutcome::Pending(id.clone())
        );

        store.approve(&id, "bob").unwrap();
        assert_eq!(
            gate.evaluate(&polling, Some("t1"), "alice", "metadata.create.entity").await.unwrap(),
            GovernanceOutcome::Approved(id.clone())
        );

        // spent by the call above
        assert_eq!(
            gate.evaluate(&polling, Some("t1"), "alice", "metadata.create.entity").await.unwrap(),
            GovernanceOutcome::Rejected(id.clone())
        );
    }

    #[tokio::test]
    async fn test_approval_only_covers_its_own_change() {
        let (gate, store) = gate();
        let subject = GovernanceSubject {
            urn: Some("urn:entity:a".into()),
            ..compliant(GovernanceTier::Tier2)
        };
        let GovernanceOutcome::Pending(id) = gate
            .evaluate(&subject, Some("t1"), "alice", "metadata.create.entity")
            .await
            .unwrap()
        else {
            panic!("expected pending");
        };
        store.approve(&id, "bob").unwrap();

        let polling = GovernanceSubject {
            approval_request_id: Some(id.clone()),
            ..subject.clone()
        };
        let other_entity = GovernanceSubject {
            urn: Some("urn:entity:b".into()),
            ..polling.clone()
        };
        let stricter = GovernanceSubject {
            tier: GovernanceTier::Tier1,
            ..polling.clone()
        };
        let rejected = GovernanceOutcome::Rejected(id.clone());

        assert_eq!(create_as(&gate, &other_entity, "t1", "alice").await, rejected);
        assert_eq!(create_as(&gate, &stricter, "t1", "alice").await, rejected);
        assert_eq!(create_as(&gate, &polling, "t1", "mallory").await, rejected);
        assert_eq!(create_as(&gate, &polling, "t2", "alice").await, rejected);
        assert_eq!(
            gate.evaluate(&polling, Some("t1"), "alice", "metadata.update.tier").await.unwrap(),
            rejected
        );

        // mismatched attempts do not spend the approval
        assert_eq!(create_as(&gate, &polling, "t1", "alice").await, GovernanceOutcome::Approved(id.clone()));
        assert_eq!(create_as(&gate, &polling, "t1", "alice").await, rejected);
    }

    #[tokio::test]
    async fn test_rejected_request() {
        let (gate, store) = gate();
        let subject = compliant(GovernanceTier::Tier1);
        let GovernanceOutcome::Pending(id) = gate.evaluate(&subject, None, "a", "m.c.e").await.unwrap() else {
            panic!("expected pending");
        };
        store.reject(&id, "bob", "not now").unwrap();

        let polling = GovernanceSubject {
            approval_request_id: Some(id.clone()),
            ..subject
        };
        assert_eq!(
            gate.evaluate(&polling, None, "a", "m.c.e").await.unwrap(),
            GovernanceOutcome::Rejected(id)
        );
    }

    #[tokio::test]
    async fn test_lineage_collaborator_overrides_flag() {
        let mut lineage = MockLineage::new();
        lineage
            .expect_has_lineage()
            .withf(|urn| urn == "urn:entity:gl")
            .returning(|_| Ok(false));
        let (gate, _) = gate();
        let gate = gate.with_lineage(Arc::new(lineage));

        let violations = gate
            .compliance_violations(&compliant(GovernanceTier::Tier3), GovernanceTier::Tier3)
            .await;
        assert_eq!(violations, vec!["missing_lineage"]);
    }

    #[tokio::test]
    async fn test_impact_bumps_risk_band() {
        let mut impact = MockImpact::new();
        impact.expect_assess().returning(|_| {
            Ok(ImpactAssessment {
                risk_score: 85,
                recommendation: Recommendation::Proceed,
            })
        });
        let (gate, store) = gate();
        let gate = gate.with_impact(Arc::new(impact));

        gate.evaluate(&compliant(GovernanceTier::Tier2), None, "a", "m.c.e").await.unwrap();
        assert_eq!(store.pending()[0].risk_band, RiskBand::High);
    }

    #[test]
    fn test_risk_band_rules() {
        let review = ImpactAssessment { risk_score: 10, recommendation: Recommendation::Review };
        let block = ImpactAssessment { risk_score: 0, recommendation: Recommendation::Block };
        let calm = ImpactAssessment { risk_score: 69, recommendation: Recommendation::Proceed };

        assert_eq!(approval_risk_band(GovernanceTier::Tier1, None), RiskBand::High);
        assert_eq!(approval_risk_band(GovernanceTier::Tier2, Some(&calm)), RiskBand::Medium);
        assert_eq!(approval_risk_band(GovernanceTier::Tier3, Some(&review)), RiskBand::Medium);
        assert_eq!(approval_risk_band(GovernanceTier::Tier1, Some(&review)), RiskBand::Critical);
        assert_eq!(approval_risk_band(GovernanceTier::Tier5, Some(&block)), RiskBand::Critical);
    }

    #[test]
    fn test_subject_from_input() {
        let input = serde_json::json!({
            "name": "gl",
            "governance": {"tier": "tier_2", "currentTier": "tier_4", "owner": "finance"}
        });
        let subject = GovernanceSubject::from_input(&input).unwrap().unwrap();
        assert_eq!(subject.tier, GovernanceTier::Tier2);
        assert!(subject.tier_change().unwrap().is_upgrade());

        assert!(GovernanceSubject::from_input(&serde_json::json!({"name": "gl"})).unwrap().is_none());
        assert!(matches!(
            GovernanceSubject::from_input(&serde_json::json!({"governance": {"tier": "tier_9"}})),
            Err(PolicyError::InvalidSubject(_))
        ));
    }
}
