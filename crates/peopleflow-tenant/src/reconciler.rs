//! Reconciliation loop
//!
//! A single background task, independent of request handling, that applies
//! time-based lifecycle transitions and raises usage alerts on a fixed
//! interval. A failure while processing one tenant is logged and never
//! aborts the tick for the remaining tenants. The cancellation signal is
//! observed between tenant iterations, never mid-tenant, and every tick
//! works from its own snapshot of the tenant list.

use crate::{
    LifecycleManager, Result, Tenant, TenantRepository, TenantStatus, UsageTracker,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Kinds of usage-overage alerts, one active alert per (tenant, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    EmployeeOverage,
    UserOverage,
    StorageOverage,
    ApiRateOverage,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmployeeOverage => "employee_overage",
            Self::UserOverage => "user_overage",
            Self::StorageOverage => "storage_overage",
            Self::ApiRateOverage => "api_rate_overage",
        }
    }
}

/// A raised usage alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageAlert {
    pub tenant_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// The reconciliation loop.
pub struct Reconciler {
    repository: Arc<dyn TenantRepository>,
    lifecycle: Arc<LifecycleManager>,
    usage: Arc<UsageTracker>,
    interval: Duration,
    /// Retention window applied when auto-cancelling after grace expiry
    retention_days: u32,
    alerts: DashMap<(String, AlertKind), UsageAlert>,
}

impl Reconciler {
    pub fn new(
        repository: Arc<dyn TenantRepository>,
        lifecycle: Arc<LifecycleManager>,
        usage: Arc<UsageTracker>,
        interval: Duration,
        retention_days: u32,
    ) -> Self {
        Self {
            repository,
            lifecycle,
            usage,
            interval,
            retention_days,
            alerts: DashMap::new(),
        }
    }

    /// Spawn the loop as a background task bound to `cancel`.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick from tokio's interval is skipped so
            // a freshly started host does not reconcile before serving.
            ticker.tick().await;
            info!(interval_seconds = interval.as_secs(), "Reconciliation loop started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Reconciliation loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.tick(&cancel, Utc::now()).await;
                    }
                }
            }
        })
    }

    /// One reconciliation pass at `now`. Public so hosts and tests can
    /// drive ticks directly.
    pub async fn run_tick_at(&self, now: DateTime<Utc>) {
        self.tick(&CancellationToken::new(), now).await;
    }

    async fn tick(&self, cancel: &CancellationToken, now: DateTime<Utc>) {
        // Fresh snapshot per tick; nothing is held across ticks.
        let tenants = match self.repository.list().await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!(error = %e, "Reconciliation tick could not list tenants");
                return;
            }
        };

        debug!(tenants = tenants.len(), "Reconciliation tick");
        for tenant in tenants {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.process_tenant(&tenant, now).await {
                warn!(
                    tenant_id = %tenant.id,
                    error = %e,
                    "Reconciliation failed for tenant, continuing"
                );
            }
        }
    }

    async fn process_tenant(&self, tenant: &Tenant, now: DateTime<Utc>) -> Result<()> {
        match tenant.status {
            TenantStatus::Active => {
                self.check_usage_alerts(tenant);
            }
            TenantStatus::Suspended => {
                self.check_usage_alerts(tenant);
                if tenant.suspension_info().grace_period_expired(now) {
                    info!(tenant_id = %tenant.id, "Grace period expired, auto-cancelling");
                    self.lifecycle
                        .auto_cancel(&tenant.id, self.retention_days, "reconciler")
                        .await?;
                }
            }
            TenantStatus::Cancelled => {
                if tenant.suspension_info().deletion_due(now) {
                    info!(tenant_id = %tenant.id, "Scheduled deletion elapsed, soft-deleting");
                    self.lifecycle.soft_delete(&tenant.id, "reconciler").await?;
                }
            }
            TenantStatus::PendingDeletion => {
                if tenant.suspension_info().deletion_due(now) {
                    info!(tenant_id = %tenant.id, "Purging tenant");
                    self.lifecycle.hard_delete(&tenant.id, "reconciler").await?;
                }
            }
            TenantStatus::Provisioning
            | TenantStatus::ProvisioningFailed
            | TenantStatus::Deleted => {}
        }
        Ok(())
    }

    /// Compare usage to plan limits and raise an overage alert unless one
    /// is already active for that (tenant, kind).
    fn check_usage_alerts(&self, tenant: &Tenant) {
        let snapshot = self.usage.snapshot(&tenant.id);
        let plan = tenant.plan;

        let overages = [
            (
                AlertKind::EmployeeOverage,
                snapshot.employees,
                plan.max_employees(),
            ),
            (AlertKind::UserOverage, snapshot.users, plan.max_users()),
            (
                AlertKind::StorageOverage,
                snapshot.storage_bytes,
                plan.max_storage_bytes(),
            ),
            (
                AlertKind::ApiRateOverage,
                snapshot.api_calls_today,
                plan.max_api_calls_per_day(),
            ),
        ];

        for (kind, current, limit) in overages {
            let Some(limit) = limit else { continue };
            if current <= limit {
                continue;
            }
            self.raise_alert(&tenant.id, kind, current, limit);
        }
    }

    fn raise_alert(&self, tenant_id: &str, kind: AlertKind, current: u64, limit: u64) {
        let key = (tenant_id.to_string(), kind);
        // Dedup check before insert
        if self.alerts.contains_key(&key) {
            return;
        }
        let alert = UsageAlert {
            tenant_id: tenant_id.to_string(),
            kind,
            message: format!("{} at {current} over plan limit {limit}", kind.as_str()),
            raised_at: Utc::now(),
        };
        warn!(tenant_id = %tenant_id, kind = kind.as_str(), current, limit, "Usage overage alert");
        self.alerts.insert(key, alert);
    }

    /// Active alerts for a tenant.
    pub fn active_alerts(&self, tenant_id: &str) -> Vec<UsageAlert> {
        self.alerts
            .iter()
            .filter(|entry| entry.key().0 == tenant_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Clear an alert once the overage is resolved.
    pub fn clear_alert(&self, tenant_id: &str, kind: AlertKind) {
        self.alerts.remove(&(tenant_id.to_string(), kind));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryTenantRepository, PlanTier};
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        reconciler: Reconciler,
        repository: Arc<InMemoryTenantRepository>,
        lifecycle: Arc<LifecycleManager>,
        usage: Arc<UsageTracker>,
    }

    fn fixture() -> Fixture {
        fixture_with(|lifecycle| lifecycle)
    }

    fn fixture_with(
        configure: impl FnOnce(LifecycleManager) -> LifecycleManager,
    ) -> Fixture {
        let repository = Arc::new(InMemoryTenantRepository::new());
        let usage = Arc::new(UsageTracker::new());
        let lifecycle = Arc::new(configure(
            LifecycleManager::new(repository.clone()).with_purger(usage.clone()),
        ));
        let reconciler = Reconciler::new(
            repository.clone(),
            lifecycle.clone(),
            usage.clone(),
            Duration::from_secs(300),
            30,
        );
        Fixture {
            reconciler,
            repository,
            lifecycle,
            usage,
        }
    }

    async fn active_tenant(f: &Fixture, id: &str, plan: PlanTier) {
        let mut tenant = Tenant::new(id, id, &format!("{id}.test"), plan);
        tenant.status = TenantStatus::Active;
        f.repository.create(&tenant).await.unwrap();
    }

    #[tokio::test]
    async fn test_grace_period_boundary() {
        let f = fixture();
        active_tenant(&f, "t-1", PlanTier::Free).await;
        let tenant = f
            .lifecycle
            .suspend("t-1", "nonpayment", 30, "billing")
            .await
            .unwrap();
        let suspended_at = tenant.suspended_at.unwrap();

        f.reconciler
            .run_tick_at(suspended_at + ChronoDuration::days(29))
            .await;
        let tenant = f.repository.get("t-1").await.unwrap().unwrap();
        assert_eq!(tenant.status, TenantStatus::Suspended);

        f.reconciler
            .run_tick_at(suspended_at + ChronoDuration::days(31))
            .await;
        let tenant = f.repository.get("t-1").await.unwrap().unwrap();
        assert_eq!(tenant.status, TenantStatus::Cancelled);
        assert!(tenant.scheduled_deletion_at.is_some());
    }

    #[tokio::test]
    async fn test_deletion_sweep_advances_to_purge() {
        let f = fixture();
        active_tenant(&f, "t-1", PlanTier::Free).await;
        f.usage.increment_employees("t-1", 5);
        let tenant = f
            .lifecycle
            .cancel("t-1", None, true, 0, "owner")
            .await
            .unwrap();
        let due = tenant.scheduled_deletion_at.unwrap();

        // Cancelled → PendingDeletion
        f.reconciler.run_tick_at(due + ChronoDuration::hours(1)).await;
        let tenant = f.repository.get("t-1").await.unwrap().unwrap();
        assert_eq!(tenant.status, TenantStatus::PendingDeletion);

        // PendingDeletion → Deleted, data purged
        f.reconciler.run_tick_at(due + ChronoDuration::hours(2)).await;
        let tenant = f.repository.get("t-1").await.unwrap().unwrap();
        assert_eq!(tenant.status, TenantStatus::Deleted);
        assert_eq!(f.usage.snapshot("t-1").employees, 0);
    }

    #[tokio::test]
    async fn test_overage_alert_raised_once() {
        let f = fixture();
        active_tenant(&f, "t-1", PlanTier::Free).await;
        f.usage.increment_employees("t-1", 12); // Free plan limit is 10

        f.reconciler.run_tick_at(Utc::now()).await;
        f.reconciler.run_tick_at(Utc::now()).await;

        let alerts = f.reconciler.active_alerts("t-1");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::EmployeeOverage);
    }

    struct FailingPurger;

    #[async_trait::async_trait]
    impl crate::TenantDataPurger for FailingPurger {
        async fn purge(&self, _tenant_id: &str) -> Result<()> {
            Err(crate::TenantError::ExternalProvider(
                "archive store unreachable".to_string(),
            ))
        }
    }

    #[tokio::test]
    async fn test_failure_on_one_tenant_does_not_abort_tick() {
        let f = fixture_with(|lifecycle| lifecycle.with_purger(Arc::new(FailingPurger)));
        // A tenant due for purge whose purge will fail.
        let mut broken = Tenant::new("t-broken", "Broken", "broken.test", PlanTier::Free);
        broken.status = TenantStatus::PendingDeletion;
        broken.scheduled_deletion_at = Some(Utc::now() - ChronoDuration::days(1));
        f.repository.create(&broken).await.unwrap();

        active_tenant(&f, "t-ok", PlanTier::Free).await;
        f.usage.increment_employees("t-ok", 20);

        f.reconciler.run_tick_at(Utc::now()).await;

        // The broken tenant's purge failed after the transition committed;
        // the error was logged and the healthy tenant was still processed
        // in the same tick.
        let broken = f.repository.get("t-broken").await.unwrap().unwrap();
        assert_eq!(broken.status, TenantStatus::Deleted);
        assert_eq!(f.reconciler.active_alerts("t-ok").len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_loop_honors_cancellation() {
        let f = fixture();
        let reconciler = Arc::new(f.reconciler);
        let cancel = CancellationToken::new();

        let handle = reconciler.spawn(cancel.clone());
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop must stop on cancellation")
            .unwrap();
    }
}
