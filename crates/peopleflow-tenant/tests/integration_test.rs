//! Integration tests for the peopleflow-tenant crate.

use peopleflow_core::Identity;
use peopleflow_tenant::{
    AdminContact, InMemoryAdminAccountService, InMemoryBaselineSeeder, InMemoryInviteMailer,
    InMemorySubscriptionService, InMemoryTenantRepository, LifecycleEventType, LifecycleManager,
    PlanTier, ProvisioningOrchestrator, ProvisioningRequest, Reconciler, Result,
    ScopedCollection, Tenant, TenantCache, TenantContext, TenantError, TenantLifecycleEvent,
    TenantOwned, TenantRepository, TenantStatus, UsageTracker,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

fn engine(repository: Arc<InMemoryTenantRepository>) -> (Arc<LifecycleManager>, Arc<UsageTracker>, Arc<TenantCache>) {
    let usage = Arc::new(UsageTracker::new());
    let cache = Arc::new(TenantCache::new());
    let lifecycle = Arc::new(
        LifecycleManager::new(repository)
            .with_purger(usage.clone())
            .with_purger(cache.clone()),
    );
    (lifecycle, usage, cache)
}

// ==================== Isolation Tests ====================

#[derive(Debug, Clone)]
struct EmployeeRecord {
    tenant_id: String,
    name: String,
}

impl TenantOwned for EmployeeRecord {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[test]
fn test_no_row_of_another_tenant_is_ever_returned() {
    let employees = ScopedCollection::new("employees");
    let system = TenantContext::elevated("system");
    for (id, tenant, name) in [
        ("e1", "acme", "Ada"),
        ("e2", "acme", "Grace"),
        ("e3", "globex", "Linus"),
    ] {
        employees
            .insert(
                &system,
                id,
                EmployeeRecord {
                    tenant_id: tenant.to_string(),
                    name: name.to_string(),
                },
            )
            .unwrap();
    }

    let acme = TenantContext::for_tenant("acme", "user-1");
    let listed = employees.list(&acme);
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|e| e.tenant_id == "acme"));

    // A known foreign row id reads as absent, and writes against it fail
    assert!(employees.get(&acme, "e3").is_none());
    assert!(employees.delete(&acme, "e3").is_err());
    let globex = TenantContext::for_tenant("globex", "user-2");
    assert_eq!(employees.get(&globex, "e3").unwrap().name, "Linus");
}

#[test]
fn test_header_claim_mismatch_is_forbidden_before_any_data_access() {
    let identity = Identity::user("user-1", "other");

    let err = TenantContext::resolve(Some("acme"), &identity).unwrap_err();

    match err {
        TenantError::ForbiddenTenantMismatch { requested, claimed } => {
            assert_eq!(requested, "acme");
            assert_eq!(claimed, "other");
        }
        other => panic!("expected ForbiddenTenantMismatch, got {other:?}"),
    }
}

// ==================== Lifecycle Tests ====================

#[tokio::test]
async fn test_full_lifecycle_chain_is_reachable() {
    let repository = Arc::new(InMemoryTenantRepository::new());
    let (lifecycle, _, _) = engine(repository.clone());
    repository
        .create(&Tenant::new("t-1", "Acme", "acme.test", PlanTier::Starter))
        .await
        .unwrap();

    lifecycle.complete_provisioning("t-1", "provisioner").await.unwrap();
    lifecycle.suspend("t-1", "nonpayment", 30, "billing").await.unwrap();
    lifecycle.cancel("t-1", None, true, 30, "owner").await.unwrap();
    lifecycle.soft_delete("t-1", "reconciler").await.unwrap();
    let tenant = lifecycle.hard_delete("t-1", "reconciler").await.unwrap();

    assert_eq!(tenant.status, TenantStatus::Deleted);

    let events: Vec<_> = repository
        .events("t-1")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        events,
        vec![
            LifecycleEventType::ProvisioningCompleted,
            LifecycleEventType::Suspended,
            LifecycleEventType::Cancelled,
            LifecycleEventType::SoftDeleted,
            LifecycleEventType::HardDeleted,
        ]
    );
}

#[tokio::test]
async fn test_illegal_transition_fails_and_leaves_status_unchanged() {
    let repository = Arc::new(InMemoryTenantRepository::new());
    let (lifecycle, _, _) = engine(repository.clone());
    let mut tenant = Tenant::new("t-1", "Acme", "acme.test", PlanTier::Free);
    tenant.status = TenantStatus::Cancelled;
    repository.create(&tenant).await.unwrap();

    let err = lifecycle.resume("t-1", "support").await.unwrap_err();
    assert!(matches!(err, TenantError::InvalidStateTransition { .. }));
    let err = lifecycle.hard_delete("t-1", "reconciler").await.unwrap_err();
    assert!(matches!(err, TenantError::InvalidStateTransition { .. }));

    let tenant = repository.get("t-1").await.unwrap().unwrap();
    assert_eq!(tenant.status, TenantStatus::Cancelled);
    assert!(repository.events("t-1").await.unwrap().is_empty());
}

// ==================== Concurrency Tests ====================

/// Repository wrapper that holds every `get` at a barrier so two racing
/// callers are guaranteed to load the same tenant version before either
/// commits.
struct RendezvousRepository {
    inner: Arc<InMemoryTenantRepository>,
    barrier: Barrier,
}

#[async_trait]
impl TenantRepository for RendezvousRepository {
    async fn create(&self, tenant: &Tenant) -> Result<()> {
        self.inner.create(tenant).await
    }

    async fn get(&self, id: &str) -> Result<Option<Tenant>> {
        let row = self.inner.get(id).await;
        self.barrier.wait().await;
        row
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
async fn test_concurrent_transitions_one_winner_one_conflict() {
    let store = Arc::new(InMemoryTenantRepository::new());
    let mut tenant = Tenant::new("t-1", "Acme", "acme.test", PlanTier::Free);
    tenant.status = TenantStatus::Suspended;
    tenant.suspended_at = Some(Utc::now());
    tenant.grace_period_ends_at = Some(Utc::now() + ChronoDuration::days(30));
    store.create(&tenant).await.unwrap();
    let events_before = store.events("t-1").await.unwrap().len();

    // Both callers load the same row version before either commits.
    let lifecycle = Arc::new(LifecycleManager::new(Arc::new(RendezvousRepository {
        inner: store.clone(),
        barrier: Barrier::new(2),
    })));

    let resume = {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move { lifecycle.resume("t-1", "support").await })
    };
    let cancel = {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move { lifecycle.cancel("t-1", None, false, 0, "owner").await })
    };

    let outcomes = [resume.await.unwrap(), cancel.await.unwrap()];
    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(TenantError::ConcurrencyConflict(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 1);

    // Exactly one new event was appended
    let events_after = store.events("t-1").await.unwrap().len();
    assert_eq!(events_after - events_before, 1);
}

#[tokio::test]
async fn test_hundred_concurrent_increments_count_exactly() {
    let usage = Arc::new(UsageTracker::new());

    let mut handles = Vec::new();
    for _ in 0..100 {
        let usage = usage.clone();
        handles.push(tokio::spawn(async move {
            usage.increment_employees("t-1", 1);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(usage.snapshot("t-1").employees, 100);
}

// ==================== Provisioning Tests ====================

#[tokio::test]
async fn test_retried_provisioning_creates_nothing_twice() {
    let repository = Arc::new(InMemoryTenantRepository::new());
    let (lifecycle, _, _) = engine(repository.clone());
    repository
        .create(&Tenant::new("t-1", "Acme", "acme.test", PlanTier::Free))
        .await
        .unwrap();

    let seeder = Arc::new(InMemoryBaselineSeeder::new());
    let accounts = Arc::new(InMemoryAdminAccountService::new());
    let mailer = Arc::new(InMemoryInviteMailer::new());
    let orchestrator = ProvisioningOrchestrator::new(
        repository.clone(),
        lifecycle,
        seeder.clone(),
        Arc::new(InMemorySubscriptionService::new()),
        accounts.clone(),
        mailer.clone(),
    );

    let request = ProvisioningRequest::new(
        "t-1",
        AdminContact::new("admin@acme.test", "Ada", "Admin"),
    )
    .with_plan(PlanTier::Starter)
    .with_idempotency_token("tok-42");

    let first = orchestrator.provision(request.clone()).await.unwrap();
    let second = orchestrator.provision(request).await.unwrap();

    assert!(!first.already_provisioned);
    assert!(second.already_provisioned);
    assert_eq!(second.subscription_id, first.subscription_id);

    use std::sync::atomic::Ordering;
    assert_eq!(seeder.roles_seeded.load(Ordering::SeqCst), 1);
    assert_eq!(accounts.created.load(Ordering::SeqCst), 1);
    assert_eq!(mailer.sent.load(Ordering::SeqCst), 1);

    let tenant = repository.get("t-1").await.unwrap().unwrap();
    assert_eq!(tenant.status, TenantStatus::Active);
    assert_eq!(tenant.plan, PlanTier::Starter);
}

// ==================== Reconciler Tests ====================

#[tokio::test]
async fn test_suspension_grace_boundary_drives_auto_cancel() {
    let repository = Arc::new(InMemoryTenantRepository::new());
    let (lifecycle, usage, _) = engine(repository.clone());
    let mut tenant = Tenant::new("t-1", "Acme", "acme.test", PlanTier::Free);
    tenant.status = TenantStatus::Active;
    repository.create(&tenant).await.unwrap();

    let reconciler = Reconciler::new(
        repository.clone(),
        lifecycle.clone(),
        usage,
        Duration::from_secs(300),
        30,
    );

    let suspended = lifecycle
        .suspend("t-1", "nonpayment", 30, "billing")
        .await
        .unwrap();
    let suspended_at = suspended.suspended_at.unwrap();

    // One day inside the grace period: nothing happens
    reconciler
        .run_tick_at(suspended_at + ChronoDuration::days(29))
        .await;
    assert_eq!(
        repository.get("t-1").await.unwrap().unwrap().status,
        TenantStatus::Suspended
    );

    // One day past it: cancelled automatically, recorded as a distinct event
    reconciler
        .run_tick_at(suspended_at + ChronoDuration::days(31))
        .await;
    let tenant = repository.get("t-1").await.unwrap().unwrap();
    assert_eq!(tenant.status, TenantStatus::Cancelled);
    assert!(tenant.scheduled_deletion_at.is_some());

    let last = repository.events("t-1").await.unwrap().pop().unwrap();
    assert_eq!(last.event_type, LifecycleEventType::AutoCancelled);
    assert_eq!(last.reason.as_deref(), Some("grace period expired"));
}

#[tokio::test]
async fn test_deletion_sweep_purges_tenant_data() {
    let repository = Arc::new(InMemoryTenantRepository::new());
    let (lifecycle, usage, cache) = engine(repository.clone());
    let mut tenant = Tenant::new("t-1", "Acme", "acme.test", PlanTier::Free);
    tenant.status = TenantStatus::Active;
    repository.create(&tenant).await.unwrap();

    usage.increment_employees("t-1", 7);
    cache
        .set("t-1", "headcount", &7u64, Duration::from_secs(600))
        .unwrap();

    let reconciler = Reconciler::new(
        repository.clone(),
        lifecycle.clone(),
        usage.clone(),
        Duration::from_secs(300),
        30,
    );

    let cancelled = lifecycle
        .cancel("t-1", Some("customer request"), true, 7, "owner")
        .await
        .unwrap();
    let due = cancelled.scheduled_deletion_at.unwrap();

    reconciler.run_tick_at(due + ChronoDuration::hours(1)).await;
    assert_eq!(
        repository.get("t-1").await.unwrap().unwrap().status,
        TenantStatus::PendingDeletion
    );

    reconciler.run_tick_at(due + ChronoDuration::hours(2)).await;
    let tenant = repository.get("t-1").await.unwrap().unwrap();
    assert_eq!(tenant.status, TenantStatus::Deleted);
    assert_eq!(usage.snapshot("t-1").employees, 0);
    let cached: Option<u64> = cache.get("t-1", "headcount").unwrap();
    assert!(cached.is_none());
}
