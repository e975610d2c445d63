//! Isolation enforcement
//!
//! Every tenant-scoped read and write passes through an explicit predicate
//! injection step: rows are filtered on tenant equality derived from the
//! ambient [`TenantContext`] unless the context is elevated. The guarantee
//! is visible in code and directly testable rather than applied as storage
//! framework magic.

use crate::{Result, TenantContext, TenantError};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// A row owned by exactly one tenant.
pub trait TenantOwned {
    fn tenant_id(&self) -> &str;
}

/// Ordering key for tenant-scoped listings, validated against a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    CreatedAt,
    Status,
}

impl FromStr for SortField {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "name" => Ok(Self::Name),
            "created_at" => Ok(Self::CreatedAt),
            "status" => Ok(Self::Status),
            other => Err(TenantError::Internal(format!(
                "unknown sort field '{other}'"
            ))),
        }
    }
}

/// A row that exposes the sortable fields.
pub trait Sortable {
    fn sort_key(&self, field: SortField) -> String;
}

impl SortField {
    /// Comparator dispatch for a validated field.
    pub fn compare<T: Sortable>(&self, a: &T, b: &T) -> Ordering {
        a.sort_key(*self).cmp(&b.sort_key(*self))
    }
}

/// An in-memory collection of tenant-owned rows with the isolation
/// predicate injected into every operation.
///
/// Rows are keyed by (owner tenant, row id), so a context scoped to tenant
/// T1 can never observe, update, or delete a row belonging to T2 even when
/// it knows the row id — and reusing an id another tenant happens to hold
/// carries no existence signal.
pub struct ScopedCollection<T: TenantOwned + Clone> {
    rows: Arc<RwLock<HashMap<(String, String), T>>>,
    name: &'static str,
}

impl<T: TenantOwned + Clone> ScopedCollection<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            name,
        }
    }

    /// The key of the row with `id` visible to `ctx`, if any. A pinned
    /// context looks up its own tenant directly; an unscoped elevated
    /// context scans.
    fn visible_key(
        rows: &HashMap<(String, String), T>,
        ctx: &TenantContext,
        id: &str,
    ) -> Option<(String, String)> {
        match ctx.tenant_id() {
            Some(tenant) => {
                let key = (tenant.to_string(), id.to_string());
                rows.contains_key(&key).then_some(key)
            }
            None => rows.keys().find(|(_, row_id)| row_id == id).cloned(),
        }
    }

    /// Insert a row. The row's owner must be visible to the context; a
    /// tenant-scoped caller cannot plant rows under another tenant.
    /// Duplicate ids are only reported within the owning tenant.
    pub fn insert(&self, ctx: &TenantContext, id: &str, row: T) -> Result<()> {
        if !ctx.can_access(row.tenant_id()) {
            return Err(TenantError::ForbiddenTenantMismatch {
                requested: row.tenant_id().to_string(),
                claimed: ctx.tenant_id().unwrap_or_default().to_string(),
            });
        }
        let key = (row.tenant_id().to_string(), id.to_string());
        let mut rows = self.rows.write();
        if rows.contains_key(&key) {
            return Err(TenantError::AlreadyExists(id.to_string()));
        }
        rows.insert(key, row);
        debug!(collection = self.name, id = %id, "Inserted scoped row");
        Ok(())
    }

    /// Fetch a row by id; rows outside the context's scope are invisible,
    /// indistinguishable from absent.
    pub fn get(&self, ctx: &TenantContext, id: &str) -> Option<T> {
        let rows = self.rows.read();
        Self::visible_key(&rows, ctx, id).and_then(|key| rows.get(&key).cloned())
    }

    /// List every row visible to the context.
    pub fn list(&self, ctx: &TenantContext) -> Vec<T> {
        self.rows
            .read()
            .values()
            .filter(|row| ctx.can_access(row.tenant_id()))
            .cloned()
            .collect()
    }

    /// List visible rows ordered by a validated sort field.
    pub fn list_sorted(&self, ctx: &TenantContext, field: SortField) -> Vec<T>
    where
        T: Sortable,
    {
        let mut rows = self.list(ctx);
        rows.sort_by(|a, b| field.compare(a, b));
        rows
    }

    /// Replace a row in place. Fails as not-found when the existing row is
    /// outside the context's scope.
    pub fn update(&self, ctx: &TenantContext, id: &str, row: T) -> Result<()> {
        let mut rows = self.rows.write();
        let key = match Self::visible_key(&rows, ctx, id) {
            Some(key) => key,
            None => return Err(TenantError::NotFound(id.to_string())),
        };
        if !ctx.can_access(row.tenant_id()) {
            return Err(TenantError::ForbiddenTenantMismatch {
                requested: row.tenant_id().to_string(),
                claimed: ctx.tenant_id().unwrap_or_default().to_string(),
            });
        }
        // An elevated caller may move the row to a new owner; re-key it.
        if row.tenant_id() != key.0 {
            rows.remove(&key);
        }
        rows.insert((row.tenant_id().to_string(), id.to_string()), row);
        Ok(())
    }

    /// Delete a row; scope rules as for `update`.
    pub fn delete(&self, ctx: &TenantContext, id: &str) -> Result<()> {
        let mut rows = self.rows.write();
        match Self::visible_key(&rows, ctx, id) {
            Some(key) => {
                rows.remove(&key);
                Ok(())
            }
            None => Err(TenantError::NotFound(id.to_string())),
        }
    }

    /// Remove every row belonging to a tenant. Used by the hard-delete
    /// purge; requires an elevated context.
    pub fn purge_tenant(&self, ctx: &TenantContext, tenant_id: &str) -> Result<usize> {
        if !ctx.is_elevated() {
            return Err(TenantError::ForbiddenTenantMismatch {
                requested: tenant_id.to_string(),
                claimed: ctx.tenant_id().unwrap_or_default().to_string(),
            });
        }
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|(owner, _), _| owner != tenant_id);
        Ok(before - rows.len())
    }
}

impl<T: TenantOwned + Clone> Default for ScopedCollection<T> {
    fn default() -> Self {
        Self::new("rows")
    }
}
