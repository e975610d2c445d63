//! Tenant provisioning orchestration
//!
//! Idempotent, multi-step setup of a new tenant's baseline data and
//! administrator account. Steps are checkpointed by name into the tenant
//! row as they complete; a resumed run re-executes only the missing steps.
//! The orchestration is deliberately not transactional across external
//! systems: an invite email already sent is never "rolled back". Failure at
//! any step parks the tenant in `ProvisioningFailed` with the reason
//! recorded.

use crate::{
    LifecycleManager, PlanTier, Result, Tenant, TenantError, TenantRepository, TenantStatus,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Ordered provisioning steps. Each is checkpointed independently.
pub const STEP_SEED_ROLES: &str = "seed_roles";
pub const STEP_CREATE_MODULES: &str = "create_modules";
pub const STEP_CREATE_DEPARTMENT: &str = "create_department";
pub const STEP_ATTACH_SUBSCRIPTION: &str = "attach_subscription";
pub const STEP_CREATE_ADMIN_ACCOUNT: &str = "create_admin_account";
pub const STEP_SEND_INVITE: &str = "send_invite";

pub const PROVISIONING_STEPS: [&str; 6] = [
    STEP_SEED_ROLES,
    STEP_CREATE_MODULES,
    STEP_CREATE_DEPARTMENT,
    STEP_ATTACH_SUBSCRIPTION,
    STEP_CREATE_ADMIN_ACCOUNT,
    STEP_SEND_INVITE,
];

/// Administrator contact for the new tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminContact {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl AdminContact {
    pub fn new(email: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
        }
    }
}

/// Provisioning request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    pub tenant_id: String,
    pub admin: AdminContact,
    pub plan: Option<PlanTier>,
    pub trial: bool,
    pub idempotency_token: Option<String>,
}

impl ProvisioningRequest {
    pub fn new(tenant_id: &str, admin: AdminContact) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            admin,
            plan: None,
            trial: false,
            idempotency_token: None,
        }
    }

    pub fn with_plan(mut self, plan: PlanTier) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn with_trial(mut self) -> Self {
        self.trial = true;
        self
    }

    pub fn with_idempotency_token(mut self, token: &str) -> Self {
        self.idempotency_token = Some(token.to_string());
        self
    }
}

/// Result of a provisioning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningOutcome {
    pub tenant_id: String,
    pub admin_user_id: Option<String>,
    pub subscription_id: Option<String>,
    pub steps_completed: Vec<String>,
    /// True when this call returned a previously recorded result instead of
    /// re-running side effects
    pub already_provisioned: bool,
}

/// Seeds a tenant's baseline directory data (roles/permissions, modules,
/// default department and position).
#[async_trait]
pub trait BaselineSeeder: Send + Sync {
    async fn seed_roles(&self, tenant_id: &str) -> Result<()>;
    async fn create_modules(&self, tenant_id: &str) -> Result<()>;
    async fn create_department(&self, tenant_id: &str) -> Result<()>;
}

/// Attaches a subscription for the tenant, returning its reference.
#[async_trait]
pub trait SubscriptionService: Send + Sync {
    async fn attach(&self, tenant_id: &str, plan: PlanTier, trial: bool) -> Result<String>;
}

/// Creates or links the tenant's administrator account.
#[async_trait]
pub trait AdminAccountService: Send + Sync {
    async fn create_or_link(&self, tenant_id: &str, contact: &AdminContact) -> Result<String>;
}

/// Sends the administrator invite email. External collaborator; cannot be
/// rolled back once sent.
#[async_trait]
pub trait InviteMailer: Send + Sync {
    async fn send_invite(&self, tenant_id: &str, contact: &AdminContact) -> Result<()>;
}

/// In-memory seeder counting invocations per method.
#[derive(Debug, Default)]
pub struct InMemoryBaselineSeeder {
    pub roles_seeded: AtomicU64,
    pub modules_created: AtomicU64,
    pub departments_created: AtomicU64,
}

impl InMemoryBaselineSeeder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineSeeder for InMemoryBaselineSeeder {
    async fn seed_roles(&self, tenant_id: &str) -> Result<()> {
        self.roles_seeded.fetch_add(1, Ordering::SeqCst);
        debug!(tenant_id = %tenant_id, "Seeded default roles");
        Ok(())
    }

    async fn create_modules(&self, tenant_id: &str) -> Result<()> {
        self.modules_created.fetch_add(1, Ordering::SeqCst);
        debug!(tenant_id = %tenant_id, "Created default modules");
        Ok(())
    }

    async fn create_department(&self, tenant_id: &str) -> Result<()> {
        self.departments_created.fetch_add(1, Ordering::SeqCst);
        debug!(tenant_id = %tenant_id, "Created default department and position");
        Ok(())
    }
}

/// In-memory subscription service.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionService {
    pub attached: AtomicU64,
}

impl InMemorySubscriptionService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionService for InMemorySubscriptionService {
    async fn attach(&self, tenant_id: &str, plan: PlanTier, trial: bool) -> Result<String> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        let id = format!("sub_{}", &Uuid::new_v4().to_string()[..12]);
        info!(tenant_id = %tenant_id, plan = plan.as_str(), trial, subscription_id = %id, "Attached subscription");
        Ok(id)
    }
}

/// In-memory admin account service.
#[derive(Debug, Default)]
pub struct InMemoryAdminAccountService {
    pub created: AtomicU64,
}

impl InMemoryAdminAccountService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdminAccountService for InMemoryAdminAccountService {
    async fn create_or_link(&self, tenant_id: &str, contact: &AdminContact) -> Result<String> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let id = format!("usr_{}", &Uuid::new_v4().to_string()[..12]);
        info!(tenant_id = %tenant_id, email = %contact.email, user_id = %id, "Created admin account");
        Ok(id)
    }
}

/// Mailer that records sends; can be armed to fail for resume tests.
#[derive(Debug, Default)]
pub struct InMemoryInviteMailer {
    pub sent: AtomicU64,
    pub fail_next: std::sync::atomic::AtomicBool,
}

impl InMemoryInviteMailer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InviteMailer for InMemoryInviteMailer {
    async fn send_invite(&self, tenant_id: &str, contact: &AdminContact) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TenantError::ExternalProvider(
                "mailer unavailable".to_string(),
            ));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        info!(tenant_id = %tenant_id, email = %contact.email, "Sent admin invite");
        Ok(())
    }
}

/// The provisioning orchestrator.
pub struct ProvisioningOrchestrator {
    repository: Arc<dyn TenantRepository>,
    lifecycle: Arc<LifecycleManager>,
    seeder: Arc<dyn BaselineSeeder>,
    subscriptions: Arc<dyn SubscriptionService>,
    accounts: Arc<dyn AdminAccountService>,
    mailer: Arc<dyn InviteMailer>,
    /// Recorded outcomes keyed by idempotency token
    outcomes: DashMap<String, ProvisioningOutcome>,
}

impl ProvisioningOrchestrator {
    pub fn new(
        repository: Arc<dyn TenantRepository>,
        lifecycle: Arc<LifecycleManager>,
        seeder: Arc<dyn BaselineSeeder>,
        subscriptions: Arc<dyn SubscriptionService>,
        accounts: Arc<dyn AdminAccountService>,
        mailer: Arc<dyn InviteMailer>,
    ) -> Self {
        Self {
            repository,
            lifecycle,
            seeder,
            subscriptions,
            accounts,
            mailer,
            outcomes: DashMap::new(),
        }
    }

    /// Run provisioning for a tenant.
    ///
    /// A second call carrying the same idempotency token against a tenant
    /// already past `Provisioning` returns the recorded outcome without
    /// re-running side-effecting steps.
    pub async fn provision(&self, request: ProvisioningRequest) -> Result<ProvisioningOutcome> {
        let mut tenant = self
            .repository
            .get(&request.tenant_id)
            .await?
            .ok_or_else(|| TenantError::NotFound(request.tenant_id.clone()))?;

        if tenant.status != TenantStatus::Provisioning {
            return self.replay_or_reject(&tenant, &request);
        }

        // Pin the idempotency token before any side effect so a retried
        // request is recognizable even after a crash.
        if let Some(token) = &request.idempotency_token {
            if tenant.idempotency_token.as_deref() != Some(token) {
                tenant.idempotency_token = Some(token.clone());
                tenant = self.repository.update(&tenant).await?;
            }
        }

        info!(
            tenant_id = %tenant.id,
            resumed_steps = tenant.steps_completed.len(),
            "Starting tenant provisioning"
        );

        for step in PROVISIONING_STEPS {
            if tenant.step_completed(step) {
                debug!(tenant_id = %tenant.id, step, "Skipping already-completed step");
                continue;
            }
            tenant = match self.run_step(tenant, step, &request).await {
                Ok(t) => t,
                Err(e) => {
                    let reason = e.to_string();
                    self.lifecycle
                        .fail_provisioning(&request.tenant_id, &reason, "provisioner")
                        .await?;
                    return Err(TenantError::ProvisioningStepFailed {
                        step: step.to_string(),
                        reason,
                    });
                }
            };
        }

        let tenant = self
            .lifecycle
            .complete_provisioning(&tenant.id, "provisioner")
            .await?;

        let outcome = ProvisioningOutcome {
            tenant_id: tenant.id.clone(),
            admin_user_id: tenant
                .metadata
                .get("admin_user_id")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            subscription_id: tenant.subscription_id.clone(),
            steps_completed: tenant.steps_completed.clone(),
            already_provisioned: false,
        };
        if let Some(token) = &request.idempotency_token {
            self.outcomes.insert(token.clone(), outcome.clone());
        }

        info!(tenant_id = %tenant.id, "Tenant provisioning completed");
        Ok(outcome)
    }

    /// Execute one step and checkpoint it on the tenant row.
    async fn run_step(
        &self,
        mut tenant: Tenant,
        step: &str,
        request: &ProvisioningRequest,
    ) -> Result<Tenant> {
        match step {
            STEP_SEED_ROLES => self.seeder.seed_roles(&tenant.id).await?,
            STEP_CREATE_MODULES => self.seeder.create_modules(&tenant.id).await?,
            STEP_CREATE_DEPARTMENT => self.seeder.create_department(&tenant.id).await?,
            STEP_ATTACH_SUBSCRIPTION => {
                let plan = request.plan.unwrap_or_default();
                let subscription_id = self
                    .subscriptions
                    .attach(&tenant.id, plan, request.trial)
                    .await?;
                tenant.plan = plan;
                tenant.subscription_id = Some(subscription_id);
            }
            STEP_CREATE_ADMIN_ACCOUNT => {
                let user_id = self
                    .accounts
                    .create_or_link(&tenant.id, &request.admin)
                    .await?;
                tenant
                    .metadata
                    .insert("admin_user_id".to_string(), user_id.into());
            }
            STEP_SEND_INVITE => self.mailer.send_invite(&tenant.id, &request.admin).await?,
            other => {
                return Err(TenantError::Internal(format!(
                    "unknown provisioning step '{other}'"
                )))
            }
        }

        tenant.steps_completed.push(step.to_string());
        let tenant = self.repository.update(&tenant).await?;
        debug!(tenant_id = %tenant.id, step, "Checkpointed provisioning step");
        Ok(tenant)
    }

    /// Handle a call against a tenant no longer in `Provisioning`.
    ///
    /// The recorded result for a tenant parked in `ProvisioningFailed` is
    /// the step failure itself, so a retry reports that failure rather than
    /// a success-shaped outcome.
    fn replay_or_reject(
        &self,
        tenant: &Tenant,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningOutcome> {
        if tenant.status == TenantStatus::ProvisioningFailed {
            let reason = tenant
                .metadata
                .get("provisioning_error")
                .and_then(|v| v.as_str())
                .unwrap_or("provisioning failed")
                .to_string();
            let step = PROVISIONING_STEPS
                .iter()
                .find(|step| !tenant.step_completed(step))
                .copied()
                .unwrap_or(STEP_SEND_INVITE)
                .to_string();
            return Err(TenantError::ProvisioningStepFailed { step, reason });
        }

        match (&request.idempotency_token, &tenant.idempotency_token) {
            (Some(token), Some(stored)) if token == stored => {
                if let Some(recorded) = self.outcomes.get(token) {
                    let mut outcome = recorded.clone();
                    outcome.already_provisioned = true;
                    return Ok(outcome);
                }
                // Recorded outcome lost (e.g. restart); reconstruct from the
                // checkpointed tenant row.
                warn!(tenant_id = %tenant.id, "Reconstructing provisioning outcome from tenant row");
                Ok(ProvisioningOutcome {
                    tenant_id: tenant.id.clone(),
                    admin_user_id: tenant
                        .metadata
                        .get("admin_user_id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    subscription_id: tenant.subscription_id.clone(),
                    steps_completed: tenant.steps_completed.clone(),
                    already_provisioned: true,
                })
            }
            _ => Err(TenantError::AlreadyExists(tenant.id.clone())),
        }
    }
}
