//! # Data Routes
//!
//! Record CRUD, ad-hoc queries, aggregation, history, saved filters, and
//! ACL updates, all through the record pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::core::error::{ApiError, ApiResult};
use crate::core::record::Record;
use crate::pipeline::history;

use super::response::{self, shape_record, shape_records};
use super::{request_context, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/data/:model", post(create_records).get(list_records))
        .route(
            "/api/data/:model/:id",
            get(get_record)
                .put(update_record)
                .patch(patch_record)
                .delete(delete_record),
        )
        .route("/api/find/:model", post(find_records))
        .route("/api/count/:model", post(count_records))
        .route("/api/aggregate/:model", post(aggregate_records))
        .route("/api/history/:model/:id", get(list_history))
        .route("/api/history/:model/:id/:change_id", get(get_history_entry))
        .route("/api/filters/:name", post(run_saved_filter))
        .route("/api/access/:model/:id", put(set_access))
}

fn body_value(body: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::InvalidBody(e.to_string()))
}

fn body_object(body: Result<Json<Value>, JsonRejection>) -> ApiResult<Record> {
    let value = body_value(body)?;
    Record::from_value(value).ok_or_else(|| ApiError::InvalidBody("body must be an object".into()))
}

/// POST /api/data/:model — batch create
async fn create_records(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let value = body_value(body)?;
    let items = value
        .as_array()
        .ok_or_else(|| ApiError::InvalidBody("batch create requires an array of records".into()))?;
    let records = items
        .iter()
        .map(|v| {
            Record::from_value(v.clone())
                .ok_or_else(|| ApiError::InvalidBody("records must be objects".into()))
        })
        .collect::<ApiResult<Vec<_>>>()?;

    let created = state.pipeline.create_all(&ctx, &model, records).await?;
    Ok(response::created(shape_records(&ctx, created)))
}

/// GET /api/data/:model — list
async fn list_records(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let records = state.pipeline.select_any(&ctx, &model, &json!({})).await?;
    Ok(response::ok(shape_records(&ctx, records)))
}

/// GET /api/data/:model/:id — read one
async fn get_record(
    State(state): State<Arc<AppState>>,
    Path((model, id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let record = state
        .pipeline
        .select_404(&ctx, &model, &json!({"where": {"id": id}}), Some(&id))
        .await?;
    Ok(response::ok(shape_record(&ctx, record)))
}

/// PUT /api/data/:model/:id — update one
async fn update_record(
    State(state): State<Arc<AppState>>,
    Path((model, id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let mut update = body_object(body)?;
    update.set("id", json!(id.clone()));
    let mut updated = state.pipeline.update_all(&ctx, &model, vec![update]).await?;
    let record = updated
        .pop()
        .ok_or_else(|| ApiError::RecordNotFound(id))?;
    Ok(response::ok(shape_record(&ctx, record)))
}

/// PATCH /api/data/:model/:id — revert when the payload clears
/// `trashed_at`, partial update otherwise
async fn patch_record(
    State(state): State<Arc<AppState>>,
    Path((model, id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let mut payload = body_object(body)?;
    payload.set("id", json!(id.clone()));

    let is_revert = matches!(payload.get("trashed_at"), Some(Value::Null));
    let mut updated = if is_revert {
        state.pipeline.revert_all(&ctx, &model, vec![payload]).await?
    } else {
        state.pipeline.update_all(&ctx, &model, vec![payload]).await?
    };
    let record = updated
        .pop()
        .ok_or_else(|| ApiError::RecordNotFound(id))?;
    Ok(response::ok(shape_record(&ctx, record)))
}

/// DELETE /api/data/:model/:id — soft delete one
async fn delete_record(
    State(state): State<Arc<AppState>>,
    Path((model, id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let mut trashed = state
        .pipeline
        .delete_all(&ctx, &model, vec![id.clone()])
        .await?;
    let record = trashed
        .pop()
        .ok_or_else(|| ApiError::RecordNotFound(id))?;
    Ok(response::ok(shape_record(&ctx, record)))
}

/// POST /api/find/:model — execute an ad-hoc filter document
async fn find_records(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let filter = body_value(body)?;
    let records = state.pipeline.select_any(&ctx, &model, &filter).await?;
    Ok(response::ok(shape_records(&ctx, records)))
}

/// POST /api/count/:model — count matching records
async fn count_records(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let filter = body_value(body)?;
    let count = state.pipeline.count_any(&ctx, &model, &filter).await?;
    Ok(response::ok(json!({ "count": count })))
}

/// POST /api/aggregate/:model — grouped aggregation
async fn aggregate_records(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let value = body_value(body)?;
    let grouped = value.get("group_by").is_some();
    let mut rows = state.pipeline.aggregate_any(&ctx, &model, &value).await?;

    // Ungrouped aggregations answer a single object.
    if !grouped && rows.len() == 1 {
        return Ok(response::ok(rows.pop()));
    }
    Ok(response::ok(rows))
}

/// GET /api/history/:model/:id — list changes, newest first
async fn list_history(
    State(state): State<Arc<AppState>>,
    Path((model, id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    if !ctx.sudo && !ctx.principal.access.can_read() {
        return Err(ApiError::AccessDenied("read access denied".into()));
    }
    // Confirms the model exists before touching its history.
    state.schemas.to_schema(&ctx, &model)?;
    let changes = history::list_changes(ctx.db(), &model, &id)?;
    Ok(response::ok(changes))
}

/// GET /api/history/:model/:id/:change_id — read one change
async fn get_history_entry(
    State(state): State<Arc<AppState>>,
    Path((model, id, change_id)): Path<(String, String, i64)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    if !ctx.sudo && !ctx.principal.access.can_read() {
        return Err(ApiError::AccessDenied("read access denied".into()));
    }
    state.schemas.to_schema(&ctx, &model)?;
    let change = history::get_change(ctx.db(), &model, &id, change_id)?;
    Ok(response::ok(change))
}

/// POST /api/filters/:name — execute a saved filter
async fn run_saved_filter(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let records = state.pipeline.run_filter(&ctx, &name).await?;
    Ok(response::ok(shape_records(&ctx, records)))
}

/// PUT /api/access/:model/:id — restricted ACL update
async fn set_access(
    State(state): State<Arc<AppState>>,
    Path((model, id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let ctx = request_context(&state, &headers, &query)?;
    let acl = body_object(body)?;
    let record = state.pipeline.access_404(&ctx, &model, &id, &acl).await?;
    Ok(response::ok(shape_record(&ctx, record)))
}
