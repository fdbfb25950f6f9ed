//! Root tenant surface: provisioning, listing, soft delete, restore.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{error_code, setup};

const SUDO: &[(&str, &str)] = &[("x-strata-sudo", "true")];

#[tokio::test]
async fn test_tenant_admin_requires_sudo() {
    let app = setup();
    let (status, body) = app
        .request("POST", "/api/root/tenant", Some(json!({"name": "globex"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "ACCESS_DENIED");
}

#[tokio::test]
async fn test_tenant_lifecycle_via_api() {
    let app = setup();

    let (status, body) = app
        .request_with(
            "POST",
            "/api/root/tenant",
            Some(json!({"name": "globex", "db_type": "relational-file", "owner_username": "hank"})),
            SUDO,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create tenant failed: {}", body);
    assert_eq!(body["data"]["tenant"]["name"], json!("globex"));
    assert_eq!(body["data"]["user"]["name"], json!("hank"));

    let (status, body) = app.request_with("GET", "/api/root/tenant", None, SUDO).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"acme"));
    assert!(names.contains(&"globex"));

    let (status, body) = app
        .request_with("GET", "/api/root/tenant/globex", None, SUDO)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["db_type"], json!("relational-file"));

    // duplicate name
    let (status, body) = app
        .request_with(
            "POST",
            "/api/root/tenant",
            Some(json!({"name": "globex"})),
            SUDO,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "TENANT_EXISTS");

    // soft delete hides the tenant and blocks requests against it
    let (status, _) = app
        .request_with("DELETE", "/api/root/tenant/globex", None, SUDO)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request_with("GET", "/api/root/tenant/globex", None, SUDO)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "TENANT_NOT_FOUND");

    // restore brings it back
    let (status, _) = app
        .request_with("PUT", "/api/root/tenant/globex", None, SUDO)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request_with("GET", "/api/root/tenant/globex", None, SUDO)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_requests_against_deleted_tenant_fail() {
    let app = setup();
    app.request_with("DELETE", "/api/root/tenant/acme", None, SUDO)
        .await;

    let (status, body) = app.request("GET", "/api/data/models", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "TENANT_NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_tenant_name_via_api() {
    let app = setup();
    let (status, body) = app
        .request_with(
            "POST",
            "/api/root/tenant",
            Some(json!({"name": "Bad Name!"})),
            SUDO,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
}
