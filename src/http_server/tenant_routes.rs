//! # Root Tenant Routes
//!
//! Administrative tenant lifecycle surface. These endpoints sit behind
//! the elevated (sudo) boundary; the outer auth layer only routes
//! root-level sessions here, and the sudo header is required as a second
//! check.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::core::error::ApiError;
use crate::tenancy::CreateTenantRequest;

use super::response;
use super::{header_is_true, AppState, SUDO_HEADER};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/root/tenant", post(create_tenant).get(list_tenants))
        .route(
            "/api/root/tenant/:name",
            get(show_tenant).delete(delete_tenant).put(restore_tenant),
        )
}

fn require_sudo(headers: &HeaderMap) -> Result<(), ApiError> {
    if header_is_true(headers, SUDO_HEADER) {
        Ok(())
    } else {
        Err(ApiError::AccessDenied(
            "tenant administration requires the sudo surface".into(),
        ))
    }
}

/// POST /api/root/tenant — provision a new tenant
async fn create_tenant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<CreateTenantRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    require_sudo(&headers)?;
    let Json(request) = body.map_err(|e| ApiError::InvalidBody(e.to_string()))?;
    let (tenant, user) = state.tenants.create_tenant(request)?;
    Ok(response::created(serde_json::json!({
        "tenant": tenant,
        "user": user,
    })))
}

/// GET /api/root/tenant — list tenants
async fn list_tenants(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_sudo(&headers)?;
    let tenants = state.tenants.list_tenants()?;
    Ok(response::ok(tenants))
}

/// GET /api/root/tenant/:name — tenant details
async fn show_tenant(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_sudo(&headers)?;
    let tenant = state.tenants.get_tenant(&name)?;
    Ok(response::ok(tenant))
}

/// DELETE /api/root/tenant/:name — soft delete
async fn delete_tenant(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_sudo(&headers)?;
    let tenant = state.tenants.delete_tenant(&name)?;
    state.schemas.invalidate_tenant(&name);
    Ok(response::ok(tenant))
}

/// PUT /api/root/tenant/:name — restore a soft-deleted tenant
async fn restore_tenant(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    require_sudo(&headers)?;
    let tenant = state.tenants.restore_tenant(&name)?;
    Ok(response::ok(tenant))
}
