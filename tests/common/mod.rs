//! Shared harness for end-to-end tests: a full application state over a
//! temporary data directory, one provisioned tenant, and a oneshot
//! request helper.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use stratadb::config::ServerConfig;
use stratadb::http_server::{build_router, AppState};
use stratadb::tenancy::{CreateTenantRequest, DbType};

pub const TENANT: &str = "acme";

pub struct TestApp {
    pub state: Arc<AppState>,
    _dir: tempfile::TempDir,
}

pub fn setup() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let state = AppState::new(config);
    state.tenants.initialize().unwrap();
    state
        .tenants
        .create_tenant(CreateTenantRequest {
            name: TENANT.to_string(),
            db_type: DbType::RelationalShared,
            owner_username: None,
            description: None,
        })
        .unwrap();
    TestApp { state, _dir: dir }
}

impl TestApp {
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.request_with(method, uri, body, &[]).await
    }

    pub async fn request_with(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        extra_headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let app = build_router(self.state.clone());
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-strata-tenant", TENANT);
        for (name, value) in extra_headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Create a model with a map of field specs; panics on failure.
    pub async fn create_model(&self, model: &str, fields: Value) {
        let (status, body) = self
            .request(
                "POST",
                &format!("/api/describe/{}", model),
                Some(serde_json::json!({ "fields": fields })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create model failed: {}", body);
    }

    /// Batch-create records; returns the created records.
    pub async fn create_records(&self, model: &str, records: Value) -> Vec<Value> {
        let (status, body) = self
            .request("POST", &format!("/api/data/{}", model), Some(records))
            .await;
        assert_eq!(status, StatusCode::CREATED, "create records failed: {}", body);
        body["data"].as_array().cloned().unwrap()
    }
}

pub fn error_code(body: &Value) -> &str {
    body["error_code"].as_str().unwrap_or("")
}
