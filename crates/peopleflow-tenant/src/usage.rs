//! Per-tenant usage metering
//!
//! One counter row per (tenant, usage period). Increments are atomic adds
//! on shared rows so concurrent writers never lose updates. Limit checks
//! are advisory: they report whether headroom remains against the tenant's
//! plan and leave the blocking decision to the caller.

use crate::{Result, TenantDataPurger};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::PlanTier;

/// The usage period a metrics row belongs to, `YYYY-MM`.
pub fn current_period() -> String {
    period_for(Utc::now().date_naive())
}

pub fn period_for(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Live counter row for one (tenant, period). Counters are atomics shared
/// through `Arc`, so increments from concurrent callers are lock-free adds.
#[derive(Debug, Default)]
pub struct UsageCounters {
    pub employees: AtomicU64,
    pub users: AtomicU64,
    pub departments: AtomicU64,
    pub storage_bytes: AtomicU64,
    pub api_calls_period: AtomicU64,
    pub api_calls_today: AtomicU64,
    /// Per-feature usage counts, keyed by feature name
    features: DashMap<String, AtomicU64>,
    /// Drives the implicit daily reset of `api_calls_today`
    last_api_request_date: Mutex<Option<NaiveDate>>,
}

/// Serializable snapshot of a usage row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub tenant_id: String,
    pub period: String,
    pub employees: u64,
    pub users: u64,
    pub departments: u64,
    pub storage_bytes: u64,
    pub api_calls_period: u64,
    pub api_calls_today: u64,
    pub features: HashMap<String, u64>,
}

/// Usage metrics tracker.
///
/// Rows are created lazily on first use in a period and superseded, never
/// deleted, when a new period begins; `purge` removes a tenant's rows only
/// as part of hard deletion.
#[derive(Debug, Default)]
pub struct UsageTracker {
    rows: DashMap<(String, String), Arc<UsageCounters>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn row(&self, tenant_id: &str) -> Arc<UsageCounters> {
        self.rows
            .entry((tenant_id.to_string(), current_period()))
            .or_default()
            .clone()
    }

    /// Current-period row without creating one.
    fn existing_row(&self, tenant_id: &str) -> Option<Arc<UsageCounters>> {
        self.rows
            .get(&(tenant_id.to_string(), current_period()))
            .map(|r| r.clone())
    }

    pub fn increment_employees(&self, tenant_id: &str, delta: u64) -> u64 {
        self.row(tenant_id).employees.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn decrement_employees(&self, tenant_id: &str, delta: u64) -> u64 {
        let row = self.row(tenant_id);
        let mut current = row.employees.load(Ordering::SeqCst);
        loop {
            let next = current.saturating_sub(delta);
            match row.employees.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn increment_users(&self, tenant_id: &str, delta: u64) -> u64 {
        self.row(tenant_id).users.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn increment_departments(&self, tenant_id: &str, delta: u64) -> u64 {
        self.row(tenant_id).departments.fetch_add(delta, Ordering::SeqCst) + delta
    }

    pub fn add_storage_bytes(&self, tenant_id: &str, delta: u64) -> u64 {
        self.row(tenant_id)
            .storage_bytes
            .fetch_add(delta, Ordering::SeqCst)
            + delta
    }

    /// Count one use of a named feature in the current period.
    pub fn increment_feature_usage(&self, tenant_id: &str, feature: &str, delta: u64) -> u64 {
        let row = self.row(tenant_id);
        let counter = row.features.entry(feature.to_string()).or_default();
        counter.fetch_add(delta, Ordering::SeqCst) + delta
    }

    /// Record one API request. The "today" counter resets implicitly when
    /// the stored last-request date differs from the current date.
    pub fn record_api_request(&self, tenant_id: &str) -> u64 {
        let row = self.row(tenant_id);
        let today = Utc::now().date_naive();
        {
            let mut last = row.last_api_request_date.lock();
            if *last != Some(today) {
                row.api_calls_today.store(0, Ordering::SeqCst);
                *last = Some(today);
            }
        }
        row.api_calls_period.fetch_add(1, Ordering::SeqCst);
        row.api_calls_today.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Snapshot the current-period row for a tenant.
    pub fn snapshot(&self, tenant_id: &str) -> UsageSnapshot {
        let period = current_period();
        let row = self.row(tenant_id);
        UsageSnapshot {
            tenant_id: tenant_id.to_string(),
            period,
            employees: row.employees.load(Ordering::SeqCst),
            users: row.users.load(Ordering::SeqCst),
            departments: row.departments.load(Ordering::SeqCst),
            storage_bytes: row.storage_bytes.load(Ordering::SeqCst),
            api_calls_period: row.api_calls_period.load(Ordering::SeqCst),
            api_calls_today: row.api_calls_today.load(Ordering::SeqCst),
            features: row
                .features
                .iter()
                .map(|e| (e.key().clone(), e.value().load(Ordering::SeqCst)))
                .collect(),
        }
    }

    /// Advisory: whether another employee fits within the plan limit.
    pub fn check_employee_limit(&self, tenant_id: &str, plan: PlanTier) -> bool {
        Self::within_limit(self.current(tenant_id, |r| &r.employees), plan.max_employees())
    }

    /// Advisory: whether another user account fits.
    pub fn check_user_limit(&self, tenant_id: &str, plan: PlanTier) -> bool {
        Self::within_limit(self.current(tenant_id, |r| &r.users), plan.max_users())
    }

    /// Advisory: whether `additional_bytes` fits within the storage limit.
    pub fn check_storage_limit(
        &self,
        tenant_id: &str,
        plan: PlanTier,
        additional_bytes: u64,
    ) -> bool {
        match plan.max_storage_bytes() {
            None => true,
            Some(limit) => {
                self.current(tenant_id, |r| &r.storage_bytes) + additional_bytes <= limit
            }
        }
    }

    /// Advisory: whether another API call today fits the daily rate limit.
    pub fn check_api_rate_limit(&self, tenant_id: &str, plan: PlanTier) -> bool {
        Self::within_limit(
            self.current(tenant_id, |r| &r.api_calls_today),
            plan.max_api_calls_per_day(),
        )
    }

    fn current(
        &self,
        tenant_id: &str,
        field: impl Fn(&UsageCounters) -> &AtomicU64,
    ) -> u64 {
        self.existing_row(tenant_id)
            .map(|row| field(&row).load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// A `None` limit means unlimited; otherwise one more must still fit.
    fn within_limit(current: u64, limit: Option<u64>) -> bool {
        match limit {
            None => true,
            Some(limit) => current + 1 <= limit,
        }
    }

    /// Remove every row belonging to a tenant, across all periods.
    pub fn purge_tenant(&self, tenant_id: &str) -> usize {
        let before = self.rows.len();
        self.rows.retain(|(t, _), _| t != tenant_id);
        let removed = before - self.rows.len();
        debug!(tenant_id = %tenant_id, removed, "Purged usage rows");
        removed
    }
}

#[async_trait]
impl TenantDataPurger for UsageTracker {
    async fn purge(&self, tenant_id: &str) -> Result<()> {
        self.purge_tenant(tenant_id);
        Ok(())
    }
}
