//! Tenant lifecycle state machine
//!
//! The only place tenant status may change. Every successful transition
//! updates the status and the milestone timestamps that transition owns,
//! and appends exactly one immutable lifecycle event, in a single unit of
//! work. Requests from a state that is not a valid source for the operation
//! fail with `InvalidStateTransition` and perform no write.

use crate::{Result, Tenant, TenantError, TenantRepository, TenantStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Lifecycle operations, used for edge validation and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOperation {
    CompleteProvisioning,
    FailProvisioning,
    Suspend,
    Resume,
    Cancel,
    SoftDelete,
    HardDelete,
}

impl LifecycleOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CompleteProvisioning => "complete_provisioning",
            Self::FailProvisioning => "fail_provisioning",
            Self::Suspend => "suspend",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::SoftDelete => "soft_delete",
            Self::HardDelete => "hard_delete",
        }
    }

    /// The allowed-edge table: valid source states for each operation.
    pub fn valid_sources(&self) -> &'static [TenantStatus] {
        match self {
            Self::CompleteProvisioning => &[TenantStatus::Provisioning],
            Self::FailProvisioning => &[TenantStatus::Provisioning],
            Self::Suspend => &[TenantStatus::Active],
            Self::Resume => &[TenantStatus::Suspended],
            Self::Cancel => &[TenantStatus::Active, TenantStatus::Suspended],
            Self::SoftDelete => &[TenantStatus::Cancelled],
            Self::HardDelete => &[TenantStatus::PendingDeletion],
        }
    }

    pub fn allowed_from(&self, status: TenantStatus) -> bool {
        self.valid_sources().contains(&status)
    }
}

/// Event types recorded in the lifecycle log. Automatic cancellation after
/// grace-period expiry is distinct from manual cancellation so the audit
/// trail keeps the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    ProvisioningCompleted,
    ProvisioningFailed,
    Suspended,
    Resumed,
    Cancelled,
    AutoCancelled,
    SoftDeleted,
    HardDeleted,
}

impl LifecycleEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProvisioningCompleted => "provisioning_completed",
            Self::ProvisioningFailed => "provisioning_failed",
            Self::Suspended => "suspended",
            Self::Resumed => "resumed",
            Self::Cancelled => "cancelled",
            Self::AutoCancelled => "auto_cancelled",
            Self::SoftDeleted => "soft_deleted",
            Self::HardDeleted => "hard_deleted",
        }
    }
}

/// Append-only lifecycle event, immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantLifecycleEvent {
    pub id: String,
    pub tenant_id: String,
    pub event_type: LifecycleEventType,
    pub previous_status: TenantStatus,
    pub new_status: TenantStatus,
    pub reason: Option<String>,
    pub triggered_by: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl TenantLifecycleEvent {
    pub fn new(
        tenant_id: &str,
        event_type: LifecycleEventType,
        previous_status: TenantStatus,
        new_status: TenantStatus,
        reason: Option<&str>,
        triggered_by: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            event_type,
            previous_status,
            new_status,
            reason: reason.map(str::to_string),
            triggered_by: triggered_by.to_string(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Hook invoked by hard delete to purge a tenant's data from a subsystem
/// (usage rows, caches, scoped business collections).
#[async_trait]
pub trait TenantDataPurger: Send + Sync {
    async fn purge(&self, tenant_id: &str) -> Result<()>;
}

/// The authoritative lifecycle manager.
pub struct LifecycleManager {
    repository: Arc<dyn TenantRepository>,
    purgers: Vec<Arc<dyn TenantDataPurger>>,
}

impl LifecycleManager {
    pub fn new(repository: Arc<dyn TenantRepository>) -> Self {
        Self {
            repository,
            purgers: Vec::new(),
        }
    }

    /// Register a subsystem to be purged on hard delete.
    pub fn with_purger(mut self, purger: Arc<dyn TenantDataPurger>) -> Self {
        self.purgers.push(purger);
        self
    }

    pub fn repository(&self) -> &Arc<dyn TenantRepository> {
        &self.repository
    }

    async fn load(&self, tenant_id: &str) -> Result<Tenant> {
        self.repository
            .get(tenant_id)
            .await?
            .ok_or_else(|| TenantError::NotFound(tenant_id.to_string()))
    }

    fn check_edge(tenant: &Tenant, op: LifecycleOperation) -> Result<()> {
        if !op.allowed_from(tenant.status) {
            return Err(TenantError::InvalidStateTransition {
                status: tenant.status.to_string(),
                operation: op.as_str().to_string(),
            });
        }
        Ok(())
    }

    async fn commit(
        &self,
        tenant: Tenant,
        event: TenantLifecycleEvent,
    ) -> Result<Tenant> {
        let updated = self.repository.commit_transition(&tenant, event).await?;
        info!(
            tenant_id = %updated.id,
            status = %updated.status,
            "Tenant lifecycle transition committed"
        );
        Ok(updated)
    }

    /// Provisioning → Active
    pub async fn complete_provisioning(
        &self,
        tenant_id: &str,
        triggered_by: &str,
    ) -> Result<Tenant> {
        let mut tenant = self.load(tenant_id).await?;
        Self::check_edge(&tenant, LifecycleOperation::CompleteProvisioning)?;

        let previous = tenant.status;
        let now = Utc::now();
        tenant.status = TenantStatus::Active;
        tenant.provisioned_at = Some(now);
        tenant.activated_at = Some(now);

        let event = TenantLifecycleEvent::new(
            tenant_id,
            LifecycleEventType::ProvisioningCompleted,
            previous,
            TenantStatus::Active,
            None,
            triggered_by,
        );
        self.commit(tenant, event).await
    }

    /// Provisioning → ProvisioningFailed, recording the reason.
    pub async fn fail_provisioning(
        &self,
        tenant_id: &str,
        reason: &str,
        triggered_by: &str,
    ) -> Result<Tenant> {
        let mut tenant = self.load(tenant_id).await?;
        Self::check_edge(&tenant, LifecycleOperation::FailProvisioning)?;

        let previous = tenant.status;
        tenant.status = TenantStatus::ProvisioningFailed;
        tenant
            .metadata
            .insert("provisioning_error".to_string(), reason.into());

        warn!(tenant_id = %tenant_id, reason = %reason, "Tenant provisioning failed");

        let event = TenantLifecycleEvent::new(
            tenant_id,
            LifecycleEventType::ProvisioningFailed,
            previous,
            TenantStatus::ProvisioningFailed,
            Some(reason),
            triggered_by,
        );
        self.commit(tenant, event).await
    }

    /// Active → Suspended, opening a grace period.
    pub async fn suspend(
        &self,
        tenant_id: &str,
        reason: &str,
        grace_period_days: u32,
        triggered_by: &str,
    ) -> Result<Tenant> {
        let mut tenant = self.load(tenant_id).await?;
        Self::check_edge(&tenant, LifecycleOperation::Suspend)?;

        let previous = tenant.status;
        let now = Utc::now();
        tenant.status = TenantStatus::Suspended;
        tenant.suspended_at = Some(now);
        tenant.grace_period_ends_at = Some(now + Duration::days(grace_period_days as i64));

        let event = TenantLifecycleEvent::new(
            tenant_id,
            LifecycleEventType::Suspended,
            previous,
            TenantStatus::Suspended,
            Some(reason),
            triggered_by,
        )
        .with_metadata("grace_period_days", grace_period_days);
        self.commit(tenant, event).await
    }

    /// Suspended → Active, clearing the grace period and any scheduled
    /// deletion.
    pub async fn resume(&self, tenant_id: &str, triggered_by: &str) -> Result<Tenant> {
        let mut tenant = self.load(tenant_id).await?;
        Self::check_edge(&tenant, LifecycleOperation::Resume)?;

        let previous = tenant.status;
        tenant.status = TenantStatus::Active;
        tenant.activated_at = Some(Utc::now());
        tenant.suspended_at = None;
        tenant.grace_period_ends_at = None;
        tenant.scheduled_deletion_at = None;

        let event = TenantLifecycleEvent::new(
            tenant_id,
            LifecycleEventType::Resumed,
            previous,
            TenantStatus::Active,
            None,
            triggered_by,
        );
        self.commit(tenant, event).await
    }

    /// Active|Suspended → Cancelled, optionally scheduling deletion.
    pub async fn cancel(
        &self,
        tenant_id: &str,
        reason: Option<&str>,
        schedule_deletion: bool,
        retention_days: u32,
        triggered_by: &str,
    ) -> Result<Tenant> {
        self.cancel_inner(
            tenant_id,
            reason,
            schedule_deletion,
            retention_days,
            triggered_by,
            LifecycleEventType::Cancelled,
        )
        .await
    }

    /// Suspended → Cancelled driven by grace-period expiry. Recorded as a
    /// distinct `AutoCancelled` event; deletion is always scheduled.
    pub async fn auto_cancel(
        &self,
        tenant_id: &str,
        retention_days: u32,
        triggered_by: &str,
    ) -> Result<Tenant> {
        self.cancel_inner(
            tenant_id,
            Some("grace period expired"),
            true,
            retention_days,
            triggered_by,
            LifecycleEventType::AutoCancelled,
        )
        .await
    }

    async fn cancel_inner(
        &self,
        tenant_id: &str,
        reason: Option<&str>,
        schedule_deletion: bool,
        retention_days: u32,
        triggered_by: &str,
        event_type: LifecycleEventType,
    ) -> Result<Tenant> {
        let mut tenant = self.load(tenant_id).await?;
        Self::check_edge(&tenant, LifecycleOperation::Cancel)?;

        let previous = tenant.status;
        let now = Utc::now();
        tenant.status = TenantStatus::Cancelled;
        tenant.cancelled_at = Some(now);
        tenant.subscription_id = None;
        if schedule_deletion {
            tenant.scheduled_deletion_at = Some(now + Duration::days(retention_days as i64));
        }

        let mut event = TenantLifecycleEvent::new(
            tenant_id,
            event_type,
            previous,
            TenantStatus::Cancelled,
            reason,
            triggered_by,
        );
        if schedule_deletion {
            event = event.with_metadata("retention_days", retention_days);
        }
        self.commit(tenant, event).await
    }

    /// Cancelled → PendingDeletion.
    pub async fn soft_delete(&self, tenant_id: &str, triggered_by: &str) -> Result<Tenant> {
        let mut tenant = self.load(tenant_id).await?;
        Self::check_edge(&tenant, LifecycleOperation::SoftDelete)?;

        let previous = tenant.status;
        tenant.status = TenantStatus::PendingDeletion;

        let event = TenantLifecycleEvent::new(
            tenant_id,
            LifecycleEventType::SoftDeleted,
            previous,
            TenantStatus::PendingDeletion,
            None,
            triggered_by,
        );
        self.commit(tenant, event).await
    }

    /// PendingDeletion → Deleted, purging tenant data through the
    /// registered purgers. Idempotent: hard-deleting an already-`Deleted`
    /// tenant succeeds without a second event, re-running the purgers so a
    /// purge that failed after the commit converges on retry.
    pub async fn hard_delete(&self, tenant_id: &str, triggered_by: &str) -> Result<Tenant> {
        let mut tenant = self.load(tenant_id).await?;
        if tenant.status == TenantStatus::Deleted {
            self.run_purgers(tenant_id).await?;
            return Ok(tenant);
        }
        Self::check_edge(&tenant, LifecycleOperation::HardDelete)?;

        let previous = tenant.status;
        tenant.status = TenantStatus::Deleted;
        tenant.metadata.clear();
        tenant.idempotency_token = None;
        tenant.billing_customer_id = None;

        let event = TenantLifecycleEvent::new(
            tenant_id,
            LifecycleEventType::HardDeleted,
            previous,
            TenantStatus::Deleted,
            None,
            triggered_by,
        );
        // The version-checked commit comes first so a conflicting writer
        // loses before any data is purged.
        let tenant = self.commit(tenant, event).await?;
        self.run_purgers(tenant_id).await?;
        Ok(tenant)
    }

    async fn run_purgers(&self, tenant_id: &str) -> Result<()> {
        for purger in &self.purgers {
            purger.purge(tenant_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryTenantRepository, PlanTier};

    async fn manager_with_tenant(status: TenantStatus) -> (LifecycleManager, String) {
        let repo = Arc::new(InMemoryTenantRepository::new());
        let mut tenant = Tenant::new("t-1", "Acme", "acme.test", PlanTier::Free);
        tenant.status = status;
        repo.create(&tenant).await.unwrap();
        (LifecycleManager::new(repo), "t-1".to_string())
    }

    #[tokio::test]
    async fn test_edge_table() {
        assert!(LifecycleOperation::Suspend.allowed_from(TenantStatus::Active));
        assert!(!LifecycleOperation::Suspend.allowed_from(TenantStatus::Cancelled));
        assert!(LifecycleOperation::Cancel.allowed_from(TenantStatus::Suspended));
        assert!(!LifecycleOperation::Resume.allowed_from(TenantStatus::Active));
        assert!(!LifecycleOperation::HardDelete.allowed_from(TenantStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_suspend_sets_grace_period() {
        let (manager, id) = manager_with_tenant(TenantStatus::Active).await;

        let tenant = manager.suspend(&id, "nonpayment", 30, "billing").await.unwrap();

        assert_eq!(tenant.status, TenantStatus::Suspended);
        let suspended_at = tenant.suspended_at.unwrap();
        let grace_end = tenant.grace_period_ends_at.unwrap();
        assert_eq!(grace_end - suspended_at, Duration::days(30));

        let events = manager.repository().events(&id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, LifecycleEventType::Suspended);
        assert_eq!(events[0].reason.as_deref(), Some("nonpayment"));
    }

    #[tokio::test]
    async fn test_resume_clears_suspension_fields() {
        let (manager, id) = manager_with_tenant(TenantStatus::Active).await;
        manager.suspend(&id, "nonpayment", 30, "billing").await.unwrap();

        let tenant = manager.resume(&id, "support").await.unwrap();

        assert_eq!(tenant.status, TenantStatus::Active);
        assert!(tenant.suspended_at.is_none());
        assert!(tenant.grace_period_ends_at.is_none());
        assert!(tenant.scheduled_deletion_at.is_none());
    }

    #[tokio::test]
    async fn test_invalid_transition_writes_nothing() {
        let (manager, id) = manager_with_tenant(TenantStatus::Cancelled).await;

        let err = manager.suspend(&id, "x", 7, "test").await.unwrap_err();
        assert!(matches!(err, TenantError::InvalidStateTransition { .. }));

        let tenant = manager.repository().get(&id).await.unwrap().unwrap();
        assert_eq!(tenant.status, TenantStatus::Cancelled);
        assert!(manager.repository().events(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_schedules_deletion() {
        let (manager, id) = manager_with_tenant(TenantStatus::Active).await;

        let tenant = manager
            .cancel(&id, Some("customer request"), true, 14, "owner")
            .await
            .unwrap();

        assert_eq!(tenant.status, TenantStatus::Cancelled);
        assert!(tenant.scheduled_deletion_at.is_some());
        assert!(tenant.subscription_id.is_none());
    }

    #[tokio::test]
    async fn test_auto_cancel_is_distinct_event() {
        let (manager, id) = manager_with_tenant(TenantStatus::Active).await;
        manager.suspend(&id, "nonpayment", 0, "billing").await.unwrap();

        manager.auto_cancel(&id, 30, "reconciler").await.unwrap();

        let events = manager.repository().events(&id).await.unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.event_type, LifecycleEventType::AutoCancelled);
    }

    #[tokio::test]
    async fn test_full_legal_chain() {
        let (manager, id) = manager_with_tenant(TenantStatus::Provisioning).await;

        manager.complete_provisioning(&id, "provisioner").await.unwrap();
        manager.suspend(&id, "nonpayment", 30, "billing").await.unwrap();
        manager.cancel(&id, None, true, 30, "owner").await.unwrap();
        manager.soft_delete(&id, "reconciler").await.unwrap();
        let tenant = manager.hard_delete(&id, "reconciler").await.unwrap();

        assert_eq!(tenant.status, TenantStatus::Deleted);
        let events = manager.repository().events(&id).await.unwrap();
        assert_eq!(events.len(), 5);
    }

    #[tokio::test]
    async fn test_hard_delete_idempotent() {
        let (manager, id) = manager_with_tenant(TenantStatus::PendingDeletion).await;

        manager.hard_delete(&id, "reconciler").await.unwrap();
        let again = manager.hard_delete(&id, "reconciler").await.unwrap();

        assert_eq!(again.status, TenantStatus::Deleted);
        // No second event for the no-op
        assert_eq!(manager.repository().events(&id).await.unwrap().len(), 1);
    }

    #[derive(Default)]
    struct CountingPurger {
        purged: std::sync::atomic::AtomicU64,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl TenantDataPurger for CountingPurger {
        async fn purge(&self, _tenant_id: &str) -> Result<()> {
            use std::sync::atomic::Ordering;
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(TenantError::ExternalProvider(
                    "archive store unreachable".to_string(),
                ));
            }
            self.purged.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Repository whose reads always observe a row a concurrent writer has
    /// since updated, so the reader's commit loses the version check.
    struct StaleReadRepository {
        inner: Arc<InMemoryTenantRepository>,
    }

    #[async_trait]
    impl TenantRepository for StaleReadRepository {
        async fn create(&self, tenant: &Tenant) -> Result<()> {
            self.inner.create(tenant).await
        }

        async fn get(&self, id: &str) -> Result<Option<Tenant>> {
            let tenant = self.inner.get(id).await?;
            if let Some(t) = &tenant {
                self.inner.update(t).await?;
            }
            Ok(tenant)
        }

        async fn get_by_domain(&self, domain: &str) -> Result<Option<Tenant>> {
            self.inner.get_by_domain(domain).await
        }

        async fn update(&self, tenant: &Tenant) -> Result<Tenant> {
            self.inner.update(tenant).await
        }

        async fn commit_transition(
            &self,
            tenant: &Tenant,
            event: TenantLifecycleEvent,
        ) -> Result<Tenant> {
            self.inner.commit_transition(tenant, event).await
        }

        async fn list(&self) -> Result<Vec<Tenant>> {
            self.inner.list().await
        }

        async fn events(&self, tenant_id: &str) -> Result<Vec<TenantLifecycleEvent>> {
            self.inner.events(tenant_id).await
        }
    }

    #[tokio::test]
    async fn test_conflicting_hard_delete_purges_nothing() {
        use std::sync::atomic::Ordering;

        let inner = Arc::new(InMemoryTenantRepository::new());
        let mut tenant = Tenant::new("t-1", "Acme", "acme.test", PlanTier::Free);
        tenant.status = TenantStatus::PendingDeletion;
        inner.create(&tenant).await.unwrap();

        let purger = Arc::new(CountingPurger::default());
        let manager = LifecycleManager::new(Arc::new(StaleReadRepository {
            inner: inner.clone(),
        }))
        .with_purger(purger.clone());

        let err = manager.hard_delete("t-1", "reconciler").await.unwrap_err();
        assert!(matches!(err, TenantError::ConcurrencyConflict(_)));

        // The losing writer purged nothing and the row is untouched
        assert_eq!(purger.purged.load(Ordering::SeqCst), 0);
        assert_eq!(
            inner.get("t-1").await.unwrap().unwrap().status,
            TenantStatus::PendingDeletion
        );
    }

    #[tokio::test]
    async fn test_retried_hard_delete_completes_a_failed_purge() {
        use std::sync::atomic::Ordering;

        let repo = Arc::new(InMemoryTenantRepository::new());
        let mut tenant = Tenant::new("t-1", "Acme", "acme.test", PlanTier::Free);
        tenant.status = TenantStatus::PendingDeletion;
        repo.create(&tenant).await.unwrap();

        let purger = Arc::new(CountingPurger::default());
        purger.fail_next.store(true, Ordering::SeqCst);
        let manager = LifecycleManager::new(repo.clone()).with_purger(purger.clone());

        assert!(manager.hard_delete("t-1", "reconciler").await.is_err());
        // The transition committed before the purge failed
        assert_eq!(
            repo.get("t-1").await.unwrap().unwrap().status,
            TenantStatus::Deleted
        );

        // The retry succeeds, completes the purge, and appends no event
        manager.hard_delete("t-1", "reconciler").await.unwrap();
        assert_eq!(purger.purged.load(Ordering::SeqCst), 1);
        assert_eq!(repo.events("t-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provisioning_failure_records_reason() {
        let (manager, id) = manager_with_tenant(TenantStatus::Provisioning).await;

        let tenant = manager
            .fail_provisioning(&id, "mailer unavailable", "provisioner")
            .await
            .unwrap();

        assert_eq!(tenant.status, TenantStatus::ProvisioningFailed);
        assert_eq!(
            tenant
                .metadata
                .get("provisioning_error")
                .and_then(|v| v.as_str()),
            Some("mailer unavailable")
        );
    }
}
