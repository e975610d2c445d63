//! Tenant context resolution
//!
//! Derives the ambient tenant identity for an inbound operation from the
//! request-carried tenant id and the authenticated identity's tenant claim.
//! The resolved context is immutable for the duration of the operation and
//! is threaded explicitly through every data-access call; it is never stored
//! as mutable process state.

use crate::{Result, TenantError};
use peopleflow_core::Identity;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The scope a resolved context grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AccessScope {
    /// Scoped to exactly one tenant
    Tenant { tenant_id: String },
    /// Explicit cross-tenant access for a superadmin identity; an optional
    /// target narrows inspection to a single tenant
    Elevated { target: Option<String> },
}

/// Immutable ambient tenant context for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    scope: AccessScope,
    user_id: String,
}

impl TenantContext {
    /// Resolve a context from the request-carried tenant id and the
    /// authenticated identity.
    ///
    /// Normal users must present a header tenant matching their claim
    /// exactly. Superadmins may omit the header (elevated, all tenants) or
    /// name a target tenant (elevated, scoped for inspection). Elevation is
    /// never inferred from a merely absent header on a normal identity.
    pub fn resolve(header_tenant: Option<&str>, identity: &Identity) -> Result<Self> {
        if identity.superadmin {
            let scope = AccessScope::Elevated {
                target: header_tenant.map(str::to_string),
            };
            debug!(user_id = %identity.user_id, ?scope, "Resolved elevated tenant context");
            return Ok(Self {
                scope,
                user_id: identity.user_id.clone(),
            });
        }

        let claimed = identity
            .tenant_claim
            .as_deref()
            .ok_or(TenantError::MissingTenantContext)?;
        let requested = header_tenant.ok_or(TenantError::MissingTenantContext)?;

        if requested != claimed {
            return Err(TenantError::ForbiddenTenantMismatch {
                requested: requested.to_string(),
                claimed: claimed.to_string(),
            });
        }

        debug!(user_id = %identity.user_id, tenant_id = %claimed, "Resolved tenant context");
        Ok(Self {
            scope: AccessScope::Tenant {
                tenant_id: claimed.to_string(),
            },
            user_id: identity.user_id.clone(),
        })
    }

    /// Build a context scoped to one tenant, used by internal callers such
    /// as the provisioning orchestrator acting on behalf of a tenant.
    pub fn for_tenant(tenant_id: &str, user_id: &str) -> Self {
        Self {
            scope: AccessScope::Tenant {
                tenant_id: tenant_id.to_string(),
            },
            user_id: user_id.to_string(),
        }
    }

    /// Build an elevated context, used by system processes such as the
    /// reconciliation loop.
    pub fn elevated(user_id: &str) -> Self {
        Self {
            scope: AccessScope::Elevated { target: None },
            user_id: user_id.to_string(),
        }
    }

    pub fn scope(&self) -> &AccessScope {
        &self.scope
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether this context carries cross-tenant privileges.
    pub fn is_elevated(&self) -> bool {
        matches!(self.scope, AccessScope::Elevated { .. })
    }

    /// The single tenant this context is pinned to, if any. An elevated
    /// context with an inspection target reports that target.
    pub fn tenant_id(&self) -> Option<&str> {
        match &self.scope {
            AccessScope::Tenant { tenant_id } => Some(tenant_id),
            AccessScope::Elevated { target } => target.as_deref(),
        }
    }

    /// The tenant this context is scoped to, failing fast when the
    /// operation requires one and the context is elevated without a target.
    pub fn require_tenant(&self) -> Result<&str> {
        self.tenant_id().ok_or(TenantError::MissingTenantContext)
    }

    /// Whether rows belonging to `tenant_id` are visible to this context.
    pub fn can_access(&self, tenant_id: &str) -> bool {
        match &self.scope {
            AccessScope::Tenant { tenant_id: own } => own == tenant_id,
            AccessScope::Elevated { target: None } => true,
            AccessScope::Elevated { target: Some(t) } => t == tenant_id,
        }
    }
}
