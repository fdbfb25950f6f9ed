//! # Response Envelope
//!
//! Every endpoint answers `{success, data?, error?, error_code?}`. Errors
//! map to HTTP statuses through their classification; internal details
//! never leave the server log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::core::context::SystemContext;
use crate::core::error::ApiError;
use crate::core::record::Record;

/// The uniform response envelope.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
}

/// 200 with data
pub fn ok(data: impl Serialize) -> Response {
    envelope(StatusCode::OK, data)
}

/// 201 with data
pub fn created(data: impl Serialize) -> Response {
    envelope(StatusCode::CREATED, data)
}

fn envelope(status: StatusCode, data: impl Serialize) -> Response {
    let data = serde_json::to_value(data).unwrap_or(Value::Null);
    (
        status,
        Json(Envelope {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(Envelope {
                success: false,
                data: None,
                error: Some(self.to_string()),
                error_code: Some(self.error_code()),
            }),
        )
            .into_response()
    }
}

/// Apply the response-shaping options: `stat`/`access` column stripping,
/// then `pick` projection. Filters run before pick.
pub fn shape_records(ctx: &SystemContext, records: Vec<Record>) -> Vec<Record> {
    records
        .into_iter()
        .map(|r| shape_record(ctx, r))
        .collect()
}

/// Shape one record.
pub fn shape_record(ctx: &SystemContext, mut record: Record) -> Record {
    if !ctx.options.stat {
        record.strip_stat();
    }
    if !ctx.options.access {
        record.strip_access();
    }
    if !ctx.options.pick.is_empty() {
        record = record.pick(&ctx.options.pick);
    }
    record
}
