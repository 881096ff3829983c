//! Admin REST endpoints — tenant onboarding and sender policy.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use crate::error::{Error, RegistryError};
use crate::onboarding::Onboarding;
use crate::tenants::{TenantRegistry, TenantSummary};

/// Shared state for admin routes.
#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<TenantRegistry>,
    pub onboarding: Arc<Onboarding>,
}

/// Build the admin router.
pub fn admin_routes(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/tenants", post(onboard_tenant))
        .route("/api/tenants/{tenant_id}", get(get_tenant))
        .route("/api/tenants/{tenant_id}/allowed-sender", put(set_allowed_sender))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "mail-intake"
    }))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

// ── Tenants ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct OnboardRequest {
    tenant_id: String,
    access_token: String,
}

/// POST /api/tenants
///
/// Resolves the tenant's destination fields, registers it and starts polling.
async fn onboard_tenant(
    State(state): State<AdminState>,
    Json(body): Json<OnboardRequest>,
) -> Response {
    let tenant_id = body.tenant_id.trim();
    if tenant_id.is_empty() || body.access_token.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "tenant_id and access_token are required",
        );
    }

    match state
        .onboarding
        .onboard(tenant_id, SecretString::from(body.access_token))
        .await
    {
        Ok(summary) => (StatusCode::CREATED, Json(summary)).into_response(),
        Err(Error::Schema(e)) => {
            warn!(tenant = %tenant_id, error = %e, "Onboarding failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
        Err(e) => {
            error!(tenant = %tenant_id, error = %e, "Onboarding failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/tenants/{tenant_id}
///
/// The tenant's mapping and sender policy; the credential is never returned.
async fn get_tenant(State(state): State<AdminState>, Path(tenant_id): Path<String>) -> Response {
    match state.registry.get(&tenant_id).await {
        Some(config) => Json(TenantSummary::from(&config)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("Tenant {tenant_id} not found"),
        ),
    }
}

// ── Sender policy ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AllowedSenderRequest {
    email: String,
}

/// PUT /api/tenants/{tenant_id}/allowed-sender
async fn set_allowed_sender(
    State(state): State<AdminState>,
    Path(tenant_id): Path<String>,
    Json(body): Json<AllowedSenderRequest>,
) -> Response {
    match state
        .registry
        .set_allowed_sender(&tenant_id, &body.email)
        .await
    {
        Ok(sender) => (
            StatusCode::OK,
            Json(json!({
                "tenant_id": tenant_id,
                "allowed_sender": sender,
            })),
        )
            .into_response(),
        Err(e @ RegistryError::NotFound { .. }) => {
            error_response(StatusCode::NOT_FOUND, e.to_string())
        }
        Err(e @ RegistryError::InvalidSender(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            error!(tenant = %tenant_id, error = %e, "Failed to update allowed sender");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
