//! Tenant persistence contract
//!
//! The storage engine is deliberately unspecified; this module defines the
//! access pattern and consistency contract it must honor, plus an in-memory
//! implementation used by the engine's tests and the default host wiring.
//!
//! Contract highlights:
//! - `update` and `commit_transition` perform a per-row version check and
//!   surface `ConcurrencyConflict` to the losing writer.
//! - `commit_transition` persists the status change and appends its
//!   lifecycle event in one unit of work: both apply or neither does.
//! - The event log is append-only; there is no API to mutate or delete it.

use crate::{Result, Tenant, TenantError, TenantLifecycleEvent};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tenant repository trait
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Create a tenant row
    async fn create(&self, tenant: &Tenant) -> Result<()>;

    /// Get tenant by ID
    async fn get(&self, id: &str) -> Result<Option<Tenant>>;

    /// Get tenant by domain
    async fn get_by_domain(&self, domain: &str) -> Result<Option<Tenant>>;

    /// Update a tenant row. The caller passes the row as loaded; the store
    /// verifies `version` still matches and bumps it, returning the
    /// persisted row. A stale version yields `ConcurrencyConflict`.
    async fn update(&self, tenant: &Tenant) -> Result<Tenant>;

    /// Persist a status change and append its lifecycle event atomically,
    /// under the same version check as `update`.
    async fn commit_transition(
        &self,
        tenant: &Tenant,
        event: TenantLifecycleEvent,
    ) -> Result<Tenant>;

    /// List all tenants
    async fn list(&self) -> Result<Vec<Tenant>>;

    /// Lifecycle events for a tenant, oldest first
    async fn events(&self, tenant_id: &str) -> Result<Vec<TenantLifecycleEvent>>;
}

/// In-memory tenant repository
#[derive(Debug, Default)]
pub struct InMemoryTenantRepository {
    tenants: Arc<RwLock<HashMap<String, Tenant>>>,
    events: Arc<RwLock<HashMap<String, Vec<TenantLifecycleEvent>>>>,
}

impl InMemoryTenantRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version check + bump, under an already-held write lock.
    fn store_checked(
        tenants: &mut HashMap<String, Tenant>,
        tenant: &Tenant,
    ) -> Result<Tenant> {
        let current = tenants
            .get(&tenant.id)
            .ok_or_else(|| TenantError::NotFound(tenant.id.clone()))?;

        if current.version != tenant.version {
            return Err(TenantError::ConcurrencyConflict(tenant.id.clone()));
        }

        let mut updated = tenant.clone();
        updated.version += 1;
        updated.updated_at = chrono::Utc::now();
        tenants.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn create(&self, tenant: &Tenant) -> Result<()> {
        let mut tenants = self.tenants.write();
        if tenants.contains_key(&tenant.id) {
            return Err(TenantError::AlreadyExists(tenant.id.clone()));
        }
        tenants.insert(tenant.id.clone(), tenant.clone());
        debug!(tenant_id = %tenant.id, "Created tenant row");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().get(id).cloned())
    }

    async fn get_by_domain(&self, domain: &str) -> Result<Option<Tenant>> {
        Ok(self
            .tenants
            .read()
            .values()
            .find(|t| t.domain == domain)
            .cloned())
    }

    async fn update(&self, tenant: &Tenant) -> Result<Tenant> {
        let mut tenants = self.tenants.write();
        Self::store_checked(&mut tenants, tenant)
    }

    async fn commit_transition(
        &self,
        tenant: &Tenant,
        event: TenantLifecycleEvent,
    ) -> Result<Tenant> {
        // Both maps are mutated under the tenant write lock so a failed
        // version check leaves the event log untouched.
        let mut tenants = self.tenants.write();
        let updated = Self::store_checked(&mut tenants, tenant)?;
        self.events
            .write()
            .entry(updated.id.clone())
            .or_default()
            .push(event);
        Ok(updated)
    }

    async fn list(&self) -> Result<Vec<Tenant>> {
        Ok(self.tenants.read().values().cloned().collect())
    }

    async fn events(&self, tenant_id: &str) -> Result<Vec<TenantLifecycleEvent>> {
        Ok(self
            .events
            .read()
            .get(tenant_id)
            .cloned()
            .unwrap_or_default())
    }
}
