//! Billing event processing
//!
//! Maps billing-provider events onto tenant lifecycle transitions:
//! a failed payment suspends the tenant with a grace period, a successful
//! payment resumes a suspended tenant, and a cancelled subscription cancels
//! the tenant with its data-retention window.

use crate::{Result, WebhookError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use peopleflow_tenant::{LifecycleManager, TenantError, TenantStatus};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Billing event types this boundary reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventType {
    PaymentFailed,
    PaymentSucceeded,
    SubscriptionCancelled,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentFailed => "payment_failed",
            Self::PaymentSucceeded => "payment_succeeded",
            Self::SubscriptionCancelled => "subscription_cancelled",
        }
    }
}

impl FromStr for BillingEventType {
    type Err = WebhookError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "payment_failed" => Ok(Self::PaymentFailed),
            "payment_succeeded" => Ok(Self::PaymentSucceeded),
            "subscription_cancelled" => Ok(Self::SubscriptionCancelled),
            other => Err(WebhookError::UnknownEventType(other.to_string())),
        }
    }
}

/// An inbound billing event as handed off by the provider gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingWebhookRequest {
    pub event_type: String,
    pub provider: String,
    pub tenant_id: String,
    /// Opaque provider payload, kept verbatim for the record
    pub payload: serde_json::Value,
    /// Provider signature, already verified upstream; retained for audit
    pub signature: Option<String>,
}

/// Processing status of a recorded billing event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingWebhookStatus {
    Processed,
    Failed,
}

/// Recorded billing event, kept for audit and manual reprocessing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingWebhookRecord {
    pub id: String,
    pub event_type: String,
    pub provider: String,
    pub tenant_id: String,
    pub payload: serde_json::Value,
    pub signature: Option<String>,
    pub status: BillingWebhookStatus,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Processes billing events into lifecycle transitions.
pub struct BillingWebhookProcessor {
    lifecycle: Arc<LifecycleManager>,
    grace_period_days: u32,
    retention_days: u32,
    records: DashMap<String, BillingWebhookRecord>,
}

impl BillingWebhookProcessor {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        grace_period_days: u32,
        retention_days: u32,
    ) -> Self {
        Self {
            lifecycle,
            grace_period_days,
            retention_days,
            records: DashMap::new(),
        }
    }

    /// Process one billing event. The returned record always exists, even
    /// when the transition failed; the caller acknowledges receipt either
    /// way.
    pub async fn process(&self, request: BillingWebhookRequest) -> BillingWebhookRecord {
        let mut record = BillingWebhookRecord {
            id: format!("bwh_{}", Uuid::new_v4().to_string().replace('-', "")),
            event_type: request.event_type.clone(),
            provider: request.provider.clone(),
            tenant_id: request.tenant_id.clone(),
            payload: request.payload.clone(),
            signature: request.signature.clone(),
            status: BillingWebhookStatus::Processed,
            error: None,
            received_at: Utc::now(),
            processed_at: None,
        };

        info!(
            event_id = %record.id,
            event_type = %record.event_type,
            provider = %record.provider,
            tenant_id = %record.tenant_id,
            "Received billing event"
        );

        match self.apply(&request).await {
            Ok(()) => {
                record.processed_at = Some(Utc::now());
            }
            Err(e) => {
                error!(
                    event_id = %record.id,
                    tenant_id = %record.tenant_id,
                    error = %e,
                    "Billing event processing failed, recorded for reprocessing"
                );
                record.status = BillingWebhookStatus::Failed;
                record.error = Some(e.to_string());
            }
        }

        self.records.insert(record.id.clone(), record.clone());
        record
    }

    /// Retry a previously failed event by record id.
    pub async fn reprocess(&self, record_id: &str) -> Result<BillingWebhookRecord> {
        let record = self
            .records
            .get(record_id)
            .map(|r| r.clone())
            .ok_or_else(|| WebhookError::EventNotFound(record_id.to_string()))?;

        let request = BillingWebhookRequest {
            event_type: record.event_type.clone(),
            provider: record.provider.clone(),
            tenant_id: record.tenant_id.clone(),
            payload: record.payload.clone(),
            signature: record.signature.clone(),
        };

        let mut updated = record;
        match self.apply(&request).await {
            Ok(()) => {
                updated.status = BillingWebhookStatus::Processed;
                updated.error = None;
                updated.processed_at = Some(Utc::now());
            }
            Err(e) => {
                updated.status = BillingWebhookStatus::Failed;
                updated.error = Some(e.to_string());
            }
        }
        self.records.insert(updated.id.clone(), updated.clone());
        Ok(updated)
    }

    /// Records that failed processing, oldest first.
    pub fn failed_records(&self) -> Vec<BillingWebhookRecord> {
        let mut failed: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.status == BillingWebhookStatus::Failed)
            .map(|r| r.clone())
            .collect();
        failed.sort_by_key(|r| r.received_at);
        failed
    }

    pub fn record(&self, record_id: &str) -> Option<BillingWebhookRecord> {
        self.records.get(record_id).map(|r| r.clone())
    }

    async fn apply(&self, request: &BillingWebhookRequest) -> Result<()> {
        let event_type: BillingEventType = request.event_type.parse()?;
        let triggered_by = format!("billing:{}", request.provider);

        match event_type {
            BillingEventType::PaymentFailed => {
                self.lifecycle
                    .suspend(
                        &request.tenant_id,
                        "payment failed",
                        self.grace_period_days,
                        &triggered_by,
                    )
                    .await?;
            }
            BillingEventType::PaymentSucceeded => {
                // Only a suspended tenant has anything to resume; a payment
                // against an already-active tenant is a no-op here.
                let tenant = self
                    .lifecycle
                    .repository()
                    .get(&request.tenant_id)
                    .await
                    .map_err(WebhookError::Tenant)?
                    .ok_or_else(|| {
                        WebhookError::Tenant(TenantError::NotFound(request.tenant_id.clone()))
                    })?;
                match tenant.status {
                    TenantStatus::Suspended => {
                        self.lifecycle
                            .resume(&request.tenant_id, &triggered_by)
                            .await?;
                    }
                    TenantStatus::Active => {
                        info!(tenant_id = %request.tenant_id, "Payment received for active tenant");
                    }
                    other => {
                        warn!(
                            tenant_id = %request.tenant_id,
                            status = %other,
                            "Payment received for tenant outside Active/Suspended"
                        );
                        return Err(WebhookError::Tenant(TenantError::InvalidStateTransition {
                            status: other.to_string(),
                            operation: "resume".to_string(),
                        }));
                    }
                }
            }
            BillingEventType::SubscriptionCancelled => {
                self.lifecycle
                    .cancel(
                        &request.tenant_id,
                        Some("subscription cancelled by provider"),
                        true,
                        self.retention_days,
                        &triggered_by,
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
