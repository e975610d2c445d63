//! Axum routes for the billing webhook boundary
//!
//! The transport always acknowledges a well-formed event with 200, even
//! when the lifecycle transition it maps to failed; the failure lives on
//! the stored record and is replayed manually.

use crate::{BillingWebhookProcessor, BillingWebhookRequest, WebhookError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::warn;

/// Router exposing the billing webhook endpoints.
pub fn billing_webhook_router(processor: Arc<BillingWebhookProcessor>) -> Router {
    Router::new()
        .route("/webhooks/billing", post(receive_billing_event))
        .route("/webhooks/billing/failed", get(list_failed_events))
        .route(
            "/webhooks/billing/:record_id/reprocess",
            post(reprocess_event),
        )
        .with_state(processor)
}

async fn receive_billing_event(
    State(processor): State<Arc<BillingWebhookProcessor>>,
    Json(request): Json<BillingWebhookRequest>,
) -> Response {
    let record = processor.process(request).await;
    // Acknowledged regardless of processing outcome
    (StatusCode::OK, Json(record)).into_response()
}

async fn list_failed_events(
    State(processor): State<Arc<BillingWebhookProcessor>>,
) -> Response {
    Json(processor.failed_records()).into_response()
}

async fn reprocess_event(
    State(processor): State<Arc<BillingWebhookProcessor>>,
    Path(record_id): Path<String>,
) -> Response {
    match processor.reprocess(&record_id).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(WebhookError::EventNotFound(id)) => {
            warn!(record_id = %id, "Reprocess requested for unknown record");
            (StatusCode::NOT_FOUND, "Record not found").into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
