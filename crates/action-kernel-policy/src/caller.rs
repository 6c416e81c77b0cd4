//! Identity of the caller, as asserted by the upstream gateway

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Who is calling, in which tenant, with which grants
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    pub tenant_id: Option<String>,
    pub actor_id: String,
    pub permissions: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
}

impl CallerIdentity {
    pub fn new(tenant_id: Option<&str>, actor_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.map(str::to_string),
            actor_id: actor_id.into(),
            ..Default::default()
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}
