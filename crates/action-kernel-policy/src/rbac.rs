//! Prefix-based RBAC table

use action_kernel_registry::AccessType;
use serde::{Deserialize, Serialize};

/// Permission required when no rule matches the action
pub const DEFAULT_PERMISSION: &str = "execute_action";

/// One row of the RBAC table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RbacRule {
    /// Matched against the start of the action id
    pub prefix: String,
    /// `read-write` rules apply to both access types
    pub access_type: AccessType,
    pub required_permissions: Vec<String>,
}

impl RbacRule {
    pub fn new<I, S>(prefix: impl Into<String>, access_type: AccessType, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefix: prefix.into(),
            access_type,
            required_permissions: required.into_iter().map(Into::into).collect(),
        }
    }

    fn applies(&self, action_id: &str, access: AccessType) -> bool {
        (self.access_type == access || self.access_type == AccessType::ReadWrite)
            && action_id.starts_with(&self.prefix)
    }
}

/// Ordered RBAC rules; the longest matching prefix wins
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacPolicy {
    rules: Vec<RbacRule>,
}

impl RbacPolicy {
    pub fn new(rules: Vec<RbacRule>) -> Self {
        Self { rules }
    }

    /// Table for the built-in metadata engines
    pub fn builtin() -> Self {
        Self::new(vec![
            RbacRule::new("metadata.", AccessType::Read, ["metadata.read"]),
            RbacRule::new("metadata.", AccessType::Write, ["metadata.write"]),
            RbacRule::new("metadata.update.tier", AccessType::Write, ["metadata.write", "governance.manage"]),
            RbacRule::new("registry.", AccessType::Read, ["registry.read"]),
        ])
    }

    pub fn with_rule(mut self, rule: RbacRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[RbacRule] {
        &self.rules
    }

    /// Permissions the action requires for this access type, plus the
    /// contract's own permissions, deduplicated in first-seen order
    pub fn required_permissions(
        &self,
        action_id: &str,
        access: AccessType,
        contract_permissions: &[String],
    ) -> Vec<String> {
        let matched = self
            .rules
            .iter()
            .filter(|r| r.applies(action_id, access))
            .max_by_key(|r| r.prefix.len());

        let mut required: Vec<String> = match matched {
            Some(rule) => rule.required_permissions.clone(),
            None => vec![DEFAULT_PERMISSION.to_string()],
        };
        for permission in contract_permissions {
            if !required.contains(permission) {
                required.push(permission.clone());
            }
        }
        required
    }
}
