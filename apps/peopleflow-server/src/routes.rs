//! Tenant API routes
//!
//! The upstream gateway authenticates requests and forwards the identity as
//! headers: `X-User-Id`, `X-Tenant-Claim`, and `X-Superadmin`. The tenant a
//! request operates on is carried in `X-Tenant-Id`. Every handler resolves
//! a [`TenantContext`] from those before touching any data; a header/claim
//! mismatch is rejected with 403 without any data access.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use peopleflow_core::Identity;
use peopleflow_tenant::{
    AdminContact, PlanTier, ProvisioningRequest, Tenant, TenantContext, TenantError,
};

use crate::app::AppState;

pub fn tenant_router(state: AppState) -> Router {
    Router::new()
        .route("/tenants", post(provision_tenant))
        .route("/tenants/:id", get(get_tenant))
        .route("/tenants/:id/suspension", get(get_suspension_info))
        .route("/tenants/:id/usage", get(get_usage))
        .route("/tenants/:id/events", get(get_events))
        .route("/tenants/:id/suspend", post(suspend_tenant))
        .route("/tenants/:id/resume", post(resume_tenant))
        .route("/tenants/:id/cancel", post(cancel_tenant))
        .with_state(state)
}

/// Error wrapper carrying the HTTP mapping for the tenant error taxonomy.
#[derive(Debug)]
pub struct ApiError(TenantError);

impl From<TenantError> for ApiError {
    fn from(e: TenantError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TenantError::MissingTenantContext => StatusCode::BAD_REQUEST,
            TenantError::ForbiddenTenantMismatch { .. } => StatusCode::FORBIDDEN,
            TenantError::NotFound(_) => StatusCode::NOT_FOUND,
            TenantError::AlreadyExists(_)
            | TenantError::InvalidStateTransition { .. }
            | TenantError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
            TenantError::ProvisioningStepFailed { .. } | TenantError::ExternalProvider(_) => {
                StatusCode::BAD_GATEWAY
            }
            TenantError::Serialization(_) | TenantError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Resolve the ambient tenant context from gateway-forwarded headers.
fn resolve_context(headers: &HeaderMap) -> ApiResult<TenantContext> {
    let user_id = header_str(headers, "x-user-id").ok_or(TenantError::MissingTenantContext)?;
    let superadmin = header_str(headers, "x-superadmin")
        .map(|v| v == "true")
        .unwrap_or(false);
    let identity = Identity {
        user_id: user_id.to_string(),
        tenant_claim: header_str(headers, "x-tenant-claim").map(str::to_string),
        superadmin,
    };
    let header_tenant = header_str(headers, "x-tenant-id");
    Ok(TenantContext::resolve(header_tenant, &identity)?)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Guard that the context may act on `tenant_id`.
fn authorize(ctx: &TenantContext, tenant_id: &str) -> ApiResult<()> {
    if !ctx.can_access(tenant_id) {
        return Err(TenantError::ForbiddenTenantMismatch {
            requested: tenant_id.to_string(),
            claimed: ctx.tenant_id().unwrap_or_default().to_string(),
        }
        .into());
    }
    Ok(())
}

/// Guard for operator-only operations.
fn authorize_elevated(ctx: &TenantContext, tenant_id: &str) -> ApiResult<()> {
    if !ctx.is_elevated() {
        warn!(tenant_id = %tenant_id, user_id = %ctx.user_id(), "Rejected non-elevated lifecycle call");
        return Err(TenantError::ForbiddenTenantMismatch {
            requested: tenant_id.to_string(),
            claimed: ctx.tenant_id().unwrap_or_default().to_string(),
        }
        .into());
    }
    authorize(ctx, tenant_id)
}

// ==================== Provisioning ====================

#[derive(Debug, Deserialize)]
pub struct ProvisionTenantBody {
    pub name: String,
    pub domain: String,
    pub plan: Option<PlanTier>,
    #[serde(default)]
    pub trial: bool,
    pub admin: AdminContact,
    pub idempotency_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProvisionTenantResponse {
    pub tenant: Tenant,
    pub already_provisioned: bool,
}

async fn provision_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProvisionTenantBody>,
) -> ApiResult<Response> {
    let ctx = resolve_context(&headers)?;
    if !ctx.is_elevated() {
        return Err(TenantError::ForbiddenTenantMismatch {
            requested: body.domain.clone(),
            claimed: ctx.tenant_id().unwrap_or_default().to_string(),
        }
        .into());
    }

    // Reuse the existing row on a retried request; create one otherwise.
    let tenant = match state.repository.get_by_domain(&body.domain).await? {
        Some(existing) => existing,
        None => {
            let tenant = Tenant::with_generated_id(
                &body.name,
                &body.domain,
                body.plan.unwrap_or_default(),
            );
            state.repository.create(&tenant).await?;
            tenant
        }
    };

    let mut request = ProvisioningRequest::new(&tenant.id, body.admin);
    if let Some(plan) = body.plan {
        request = request.with_plan(plan);
    }
    if body.trial {
        request = request.with_trial();
    }
    if let Some(token) = &body.idempotency_token {
        request = request.with_idempotency_token(token);
    }

    let outcome = state.provisioning.provision(request).await?;
    let tenant = state
        .repository
        .get(&outcome.tenant_id)
        .await?
        .ok_or_else(|| TenantError::NotFound(outcome.tenant_id.clone()))?;

    let status = if outcome.already_provisioned {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(ProvisionTenantResponse {
            tenant,
            already_provisioned: outcome.already_provisioned,
        }),
    )
        .into_response())
}

// ==================== Reads ====================

async fn get_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Tenant>> {
    let ctx = resolve_context(&headers)?;
    authorize(&ctx, &id)?;

    let tenant = state
        .repository
        .get(&id)
        .await?
        .ok_or_else(|| TenantError::NotFound(id))?;
    Ok(Json(tenant))
}

async fn get_suspension_info(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = resolve_context(&headers)?;
    authorize(&ctx, &id)?;

    let tenant = state
        .repository
        .get(&id)
        .await?
        .ok_or_else(|| TenantError::NotFound(id))?;
    Ok(Json(tenant.suspension_info()).into_response())
}

async fn get_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = resolve_context(&headers)?;
    authorize(&ctx, &id)?;

    Ok(Json(state.usage.snapshot(&id)).into_response())
}

async fn get_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let ctx = resolve_context(&headers)?;
    authorize(&ctx, &id)?;

    let events = state.repository.events(&id).await?;
    Ok(Json(events).into_response())
}

// ==================== Lifecycle ====================

#[derive(Debug, Deserialize)]
pub struct SuspendBody {
    pub reason: String,
    pub grace_period_days: Option<u32>,
}

async fn suspend_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<SuspendBody>,
) -> ApiResult<Json<Tenant>> {
    let ctx = resolve_context(&headers)?;
    authorize_elevated(&ctx, &id)?;

    let grace = body
        .grace_period_days
        .unwrap_or(state.config.tenancy.default_grace_period_days);
    let tenant = state
        .lifecycle
        .suspend(&id, &body.reason, grace, ctx.user_id())
        .await?;
    Ok(Json(tenant))
}

async fn resume_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Tenant>> {
    let ctx = resolve_context(&headers)?;
    authorize_elevated(&ctx, &id)?;

    let tenant = state.lifecycle.resume(&id, ctx.user_id()).await?;
    Ok(Json(tenant))
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub reason: Option<String>,
    #[serde(default = "default_schedule_deletion")]
    pub schedule_deletion: bool,
    pub retention_days: Option<u32>,
}

fn default_schedule_deletion() -> bool {
    true
}

async fn cancel_tenant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> ApiResult<Json<Tenant>> {
    let ctx = resolve_context(&headers)?;
    // A tenant may cancel itself; operators may cancel any tenant
    authorize(&ctx, &id)?;

    let retention = body
        .retention_days
        .unwrap_or(state.config.reconciler.default_retention_days);
    let tenant = state
        .lifecycle
        .cancel(
            &id,
            body.reason.as_deref(),
            body.schedule_deletion,
            retention,
            ctx.user_id(),
        )
        .await?;
    Ok(Json(tenant))
}
