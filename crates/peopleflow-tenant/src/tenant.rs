//! Core tenant data model
//!
//! The tenant row carries the lifecycle status, the milestone timestamps
//! owned by each transition, and a version counter used for optimistic
//! concurrency on every update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Tenant lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Baseline data is being set up
    Provisioning,
    /// Provisioning failed permanently; terminal
    ProvisioningFailed,
    /// Tenant is operational
    Active,
    /// Tenant is suspended, within its grace period
    Suspended,
    /// Subscription cancelled, data retained
    Cancelled,
    /// Marked for deletion, awaiting the purge
    PendingDeletion,
    /// Tenant data purged; terminal
    Deleted,
}

impl Default for TenantStatus {
    fn default() -> Self {
        Self::Provisioning
    }
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::ProvisioningFailed => "provisioning_failed",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::PendingDeletion => "pending_deletion",
            Self::Deleted => "deleted",
        }
    }

    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted | Self::ProvisioningFailed)
    }
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    /// Free tier with tight limits
    Free,
    /// Starter tier for small teams
    Starter,
    /// Professional tier
    Professional,
    /// Enterprise tier, unlimited
    Enterprise,
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Free
    }
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }

    /// Maximum employee records, `None` meaning unlimited
    pub fn max_employees(&self) -> Option<u64> {
        match self {
            Self::Free => Some(10),
            Self::Starter => Some(50),
            Self::Professional => Some(500),
            Self::Enterprise => None,
        }
    }

    /// Maximum user accounts
    pub fn max_users(&self) -> Option<u64> {
        match self {
            Self::Free => Some(3),
            Self::Starter => Some(15),
            Self::Professional => Some(100),
            Self::Enterprise => None,
        }
    }

    /// Maximum storage in bytes
    pub fn max_storage_bytes(&self) -> Option<u64> {
        match self {
            Self::Free => Some(100 * 1024 * 1024),           // 100 MB
            Self::Starter => Some(1024 * 1024 * 1024),       // 1 GB
            Self::Professional => Some(50 * 1024 * 1024 * 1024), // 50 GB
            Self::Enterprise => None,
        }
    }

    /// Maximum API calls per day
    pub fn max_api_calls_per_day(&self) -> Option<u64> {
        match self {
            Self::Free => Some(1_000),
            Self::Starter => Some(10_000),
            Self::Professional => Some(100_000),
            Self::Enterprise => None,
        }
    }
}

/// Tenant entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique tenant ID
    pub id: String,
    /// Display name
    pub name: String,
    /// Primary domain (e.g. acme.example.com)
    pub domain: String,
    /// Lifecycle status; changed only by the lifecycle state machine
    pub status: TenantStatus,
    /// Subscription plan
    pub plan: PlanTier,
    /// When provisioning completed
    pub provisioned_at: Option<DateTime<Utc>>,
    /// When the tenant was last activated
    pub activated_at: Option<DateTime<Utc>>,
    /// Set only by Suspend
    pub suspended_at: Option<DateTime<Utc>>,
    /// Set only by Suspend; cleared by Resume
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    /// Set only by Cancel
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Set by Cancel when deletion is scheduled; cleared by Resume
    pub scheduled_deletion_at: Option<DateTime<Utc>>,
    /// Guards duplicate provisioning requests
    pub idempotency_token: Option<String>,
    /// Provisioning steps already applied, by name
    pub steps_completed: Vec<String>,
    /// External billing customer reference
    pub billing_customer_id: Option<String>,
    /// Active subscription reference; at most one at a time
    pub subscription_id: Option<String>,
    /// Typed metadata map
    pub metadata: HashMap<String, serde_json::Value>,
    /// Optimistic concurrency version, bumped on every persisted update
    pub version: u64,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Create a new tenant in the `Provisioning` state
    pub fn new(id: &str, name: &str, domain: &str, plan: PlanTier) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            domain: domain.to_string(),
            status: TenantStatus::Provisioning,
            plan,
            provisioned_at: None,
            activated_at: None,
            suspended_at: None,
            grace_period_ends_at: None,
            cancelled_at: None,
            scheduled_deletion_at: None,
            idempotency_token: None,
            steps_completed: Vec::new(),
            billing_customer_id: None,
            subscription_id: None,
            metadata: HashMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a tenant with a generated UUID
    pub fn with_generated_id(name: &str, domain: &str, plan: PlanTier) -> Self {
        Self::new(&Uuid::new_v4().to_string(), name, domain, plan)
    }

    /// Whether a provisioning step has already been applied
    pub fn step_completed(&self, step: &str) -> bool {
        self.steps_completed.iter().any(|s| s == step)
    }

    /// Read-only projection of the current suspension state
    pub fn suspension_info(&self) -> TenantSuspensionInfo {
        TenantSuspensionInfo {
            tenant_id: self.id.clone(),
            status: self.status,
            suspended_at: self.suspended_at,
            grace_period_ends_at: self.grace_period_ends_at,
            scheduled_deletion_at: self.scheduled_deletion_at,
        }
    }
}

/// Derived view of a tenant's suspension and deletion schedule.
/// Computed on demand, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSuspensionInfo {
    pub tenant_id: String,
    pub status: TenantStatus,
    pub suspended_at: Option<DateTime<Utc>>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    pub scheduled_deletion_at: Option<DateTime<Utc>>,
}

impl TenantSuspensionInfo {
    /// Whether the grace period has elapsed at `now`
    pub fn grace_period_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TenantStatus::Suspended)
            && self.grace_period_ends_at.is_some_and(|t| now > t)
    }

    /// Whether the scheduled deletion time has elapsed at `now`
    pub fn deletion_due(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            TenantStatus::Cancelled | TenantStatus::PendingDeletion
        ) && self.scheduled_deletion_at.is_some_and(|t| t <= now)
    }
}
