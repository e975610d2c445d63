//! Billing webhook boundary for PeopleFlow
//!
//! Receives billing-provider events (payment failed, payment succeeded,
//! subscription cancelled) and drives the corresponding tenant lifecycle
//! transitions. Signature verification happens upstream at the provider
//! gateway; events arriving here are already authenticated.
//!
//! Every received event is recorded. A processing failure is captured on
//! the record's `error` field for manual reprocessing, and the transport
//! response acknowledges receipt regardless, so the provider never retries
//! into a tenant stuck mid-transition.

pub mod billing;
pub mod routes;

pub use billing::*;
pub use routes::*;

use thiserror::Error;

/// Webhook errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Unknown billing event type: {0}")]
    UnknownEventType(String),

    #[error("Event carries no tenant reference")]
    MissingTenant,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Tenant(#[from] peopleflow_tenant::TenantError),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
