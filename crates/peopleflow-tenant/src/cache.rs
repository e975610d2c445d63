//! Tenant-scoped TTL cache
//!
//! A namespaced read cache for expensive per-tenant aggregates. Entries are
//! keyed by (tenant, key) so one tenant's entries can never shadow or serve
//! another's. Concurrent misses on the same key are not deduplicated: both
//! callers may invoke the factory and the later write wins. That race is
//! accepted; this is not a single-flight cache.

use crate::{Result, TenantDataPurger, TenantError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Namespaced TTL cache.
#[derive(Debug, Default)]
pub struct TenantCache {
    entries: DashMap<(String, String), CacheEntry>,
}

impl TenantCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn namespaced(tenant_id: &str, key: &str) -> (String, String) {
        (tenant_id.to_string(), key.to_string())
    }

    /// Return the cached value if present and unexpired; otherwise invoke
    /// `factory`, store its result with `ttl`, and return it.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        tenant_id: &str,
        key: &str,
        ttl: Duration,
        factory: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get(tenant_id, key)? {
            return Ok(value);
        }

        let value = factory().await?;
        self.set(tenant_id, key, &value, ttl)?;
        debug!(tenant_id = %tenant_id, key = %key, "Cache fill");
        Ok(value)
    }

    /// Read a cached value, expiring it lazily.
    pub fn get<T: DeserializeOwned>(&self, tenant_id: &str, key: &str) -> Result<Option<T>> {
        let map_key = Self::namespaced(tenant_id, key);
        // Shard guard must be released before the expired-entry removal.
        let expired = {
            match self.entries.get(&map_key) {
                Some(entry) if !entry.is_expired() => {
                    let value = serde_json::from_value(entry.value.clone())
                        .map_err(|e| TenantError::Serialization(e.to_string()))?;
                    return Ok(Some(value));
                }
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.entries.remove(&map_key);
        }
        Ok(None)
    }

    /// Store a value with a TTL.
    pub fn set<T: Serialize>(
        &self,
        tenant_id: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| TenantError::Serialization(e.to_string()))?;
        self.entries.insert(
            Self::namespaced(tenant_id, key),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    /// Eagerly invalidate a key, used by writes that would make the cached
    /// value stale.
    pub fn remove(&self, tenant_id: &str, key: &str) {
        self.entries.remove(&Self::namespaced(tenant_id, key));
    }

    /// Drop every entry belonging to a tenant.
    pub fn purge_tenant(&self, tenant_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(t, _), _| t != tenant_id);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TenantDataPurger for TenantCache {
    async fn purge(&self, tenant_id: &str) -> Result<()> {
        self.purge_tenant(tenant_id);
        Ok(())
    }
}
