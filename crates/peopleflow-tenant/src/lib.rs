//! Tenant isolation and lifecycle orchestration for PeopleFlow
//!
//! This crate provides the multi-tenancy engine:
//! - Tenant context resolution from request metadata and identity claims
//! - Isolation enforcement on every tenant-scoped read and write
//! - The authoritative tenant lifecycle state machine with an append-only
//!   event log
//! - Idempotent, resumable tenant provisioning
//! - Per-tenant, per-period usage metering with advisory limit checks
//! - A periodic reconciliation loop for time-based transitions and alerts
//! - A tenant-scoped TTL cache

pub mod cache;
pub mod context;
pub mod isolation;
pub mod lifecycle;
pub mod provisioning;
pub mod reconciler;
pub mod repository;
pub mod tenant;
pub mod usage;

pub use cache::*;
pub use context::*;
pub use isolation::*;
pub use lifecycle::*;
pub use provisioning::*;
pub use reconciler::*;
pub use repository::*;
pub use tenant::*;
pub use usage::*;

use thiserror::Error;

/// Multi-tenancy errors
#[derive(Error, Debug)]
pub enum TenantError {
    #[error("Tenant not found: {0}")]
    NotFound(String),

    #[error("Tenant already exists: {0}")]
    AlreadyExists(String),

    #[error("Operation requires a tenant context")]
    MissingTenantContext,

    #[error("Tenant mismatch: request targets '{requested}' but identity is bound to '{claimed}'")]
    ForbiddenTenantMismatch { requested: String, claimed: String },

    #[error("Invalid state transition: {operation} is not allowed from {status}")]
    InvalidStateTransition { status: String, operation: String },

    #[error("Concurrent modification of tenant {0}, retry the operation")]
    ConcurrencyConflict(String),

    #[error("Provisioning step '{step}' failed: {reason}")]
    ProvisioningStepFailed { step: String, reason: String },

    #[error("External provider error: {0}")]
    ExternalProvider(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TenantError>;
