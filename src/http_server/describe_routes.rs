//! # Describe Routes
//!
//! The dynamic-model surface: model and field definitions as REST
//! resources, backed by the model admin service.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use crate::core::error::ApiError;

use super::response::{self, shape_record};
use super::{request_context, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/describe/:model",
            post(create_model)
                .get(get_model)
                .put(update_model)
                .delete(delete_model),
        )
        .route(
            "/api/describe/:model/:field",
            post(create_field)
                .get(get_field)
                .put(update_field)
                .delete(delete_field),
        )
}

fn body_or_empty(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(e) => Err(ApiError::InvalidBody(e.to_string())),
    }
}

/// POST /api/describe/:model — create a model (optionally with fields)
async fn create_model(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let body = body_or_empty(body)?;
    let record = state.admin.create_model(&ctx, &model, &body).await?;
    Ok(response::created(shape_record(&ctx, record)))
}

/// GET /api/describe/:model — read model metadata (fields excluded)
async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let record = state.admin.get_model(&ctx, &model).await?;
    Ok(response::ok(shape_record(&ctx, record)))
}

/// PUT /api/describe/:model — update model metadata
async fn update_model(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let body = body_or_empty(body)?;
    let record = state.admin.update_model(&ctx, &model, &body).await?;
    Ok(response::ok(shape_record(&ctx, record)))
}

/// DELETE /api/describe/:model — soft-delete, dropping the backing table
async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let record = state.admin.delete_model(&ctx, &model).await?;
    Ok(response::ok(shape_record(&ctx, record)))
}

/// POST /api/describe/:model/:field — create a field (ALTER TABLE)
async fn create_field(
    State(state): State<Arc<AppState>>,
    Path((model, field)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let body = body_or_empty(body)?;
    let record = state.admin.create_field(&ctx, &model, &field, &body).await?;
    Ok(response::created(shape_record(&ctx, record)))
}

/// GET /api/describe/:model/:field — read one field
async fn get_field(
    State(state): State<Arc<AppState>>,
    Path((model, field)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let record = state.admin.get_field(&ctx, &model, &field).await?;
    Ok(response::ok(shape_record(&ctx, record)))
}

/// PUT /api/describe/:model/:field — update a field definition
async fn update_field(
    State(state): State<Arc<AppState>>,
    Path((model, field)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let body = body_or_empty(body)?;
    let record = state.admin.update_field(&ctx, &model, &field, &body).await?;
    Ok(response::ok(shape_record(&ctx, record)))
}

/// DELETE /api/describe/:model/:field — drop a field and its column
async fn delete_field(
    State(state): State<Arc<AppState>>,
    Path((model, field)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let record = state.admin.delete_field(&ctx, &model, &field).await?;
    Ok(response::ok(shape_record(&ctx, record)))
}
