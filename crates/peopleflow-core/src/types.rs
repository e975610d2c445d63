//! Shared identity types.

use serde::{Deserialize, Serialize};

/// Authenticated identity attached to an inbound operation.
///
/// Produced by the authentication layer (out of scope here); the tenant
/// claim reflects what the identity provider asserted, independent of any
/// tenant id the request itself carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// User ID
    pub user_id: String,
    /// Tenant claim asserted by the identity provider, absent for
    /// superadmin identities
    pub tenant_claim: Option<String>,
    /// Whether this identity may operate across tenants
    pub superadmin: bool,
}

impl Identity {
    /// Create an identity bound to a single tenant
    pub fn user(user_id: &str, tenant: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            tenant_claim: Some(tenant.to_string()),
            superadmin: false,
        }
    }

    /// Create a superadmin identity with no tenant claim
    pub fn superadmin(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            tenant_claim: None,
            superadmin: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_identity() {
        let identity = Identity::user("user-1", "acme");

        assert_eq!(identity.tenant_claim, Some("acme".to_string()));
        assert!(!identity.superadmin);
    }

    #[test]
    fn test_superadmin_identity() {
        let identity = Identity::superadmin("root-1");

        assert!(identity.tenant_claim.is_none());
        assert!(identity.superadmin);
    }
}
