//! End-to-end flows through the HTTP surface: dynamic models, record
//! CRUD, queries, aggregation, saved filters, and change history.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{error_code, setup};

#[tokio::test]
async fn test_create_model_then_create_and_query_records() {
    let app = setup();
    app.create_model(
        "products",
        json!({
            "name": {"type": "text", "required": true},
            "price": {"type": "decimal"}
        }),
    )
    .await;

    let created = app
        .create_records("products", json!([{"name": "Widget", "price": 29.99}]))
        .await;
    assert_eq!(created.len(), 1);
    let record = &created[0];
    let id = record["id"].as_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());
    assert_eq!(record["created_at"], record["updated_at"]);
    assert!(record["trashed_at"].is_null());
    assert!(record["deleted_at"].is_null());

    let (status, body) = app
        .request(
            "POST",
            "/api/find/products",
            Some(json!({"where": {"price": {"$gte": 10}}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("Widget"));
    assert_eq!(rows[0]["id"], json!(id));
}

#[tokio::test]
async fn test_batch_create_is_atomic() {
    let app = setup();
    app.create_model(
        "products",
        json!({
            "name": {"type": "text", "required": true},
            "price": {"type": "decimal"}
        }),
    )
    .await;

    // The middle record is missing the required name; nothing lands.
    let (status, body) = app
        .request(
            "POST",
            "/api/data/products",
            Some(json!([{"name": "A"}, {"price": 10}, {"name": "C"}])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (_, body) = app.request("POST", "/api/find/products", Some(json!({}))).await;
    let rows = body["data"].as_array().unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_soft_delete_and_revert() {
    let app = setup();
    app.create_model("products", json!({"name": {"type": "text", "required": true}}))
        .await;
    let created = app
        .create_records("products", json!([{"name": "Widget"}]))
        .await;
    let id = created[0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .request("DELETE", &format!("/api/data/products/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["data"]["trashed_at"].is_null());

    let (_, body) = app.request("GET", "/api/data/products", None).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (_, body) = app
        .request("GET", "/api/data/products?trashed=include", None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = app
        .request("GET", "/api/data/products?trashed=only", None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = app
        .request(
            "PATCH",
            &format!("/api/data/products/{}?include_trashed=true", id),
            Some(json!({"trashed_at": null})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "revert failed: {}", body);
    assert!(body["data"]["trashed_at"].is_null());

    let (_, body) = app.request("GET", "/api/data/products", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_revert_without_option_rejected() {
    let app = setup();
    app.create_model("products", json!({"name": {"type": "text"}}))
        .await;
    let created = app.create_records("products", json!([{"name": "W"}])).await;
    let id = created[0]["id"].as_str().unwrap().to_string();
    app.request("DELETE", &format!("/api/data/products/{}", id), None)
        .await;

    let (status, body) = app
        .request(
            "PATCH",
            &format!("/api/data/products/{}", id),
            Some(json!({"trashed_at": null})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_update_rejected_on_trashed_record() {
    let app = setup();
    app.create_model("products", json!({"name": {"type": "text"}}))
        .await;
    let created = app.create_records("products", json!([{"name": "W"}])).await;
    let id = created[0]["id"].as_str().unwrap().to_string();
    app.request("DELETE", &format!("/api/data/products/{}", id), None)
        .await;

    let (status, body) = app
        .request(
            "PUT",
            &format!("/api/data/products/{}", id),
            Some(json!({"name": "X"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "TRASHED_RECORD");
}

#[tokio::test]
async fn test_double_delete_is_already_trashed() {
    let app = setup();
    app.create_model("products", json!({"name": {"type": "text"}}))
        .await;
    let created = app.create_records("products", json!([{"name": "W"}])).await;
    let id = created[0]["id"].as_str().unwrap().to_string();

    app.request("DELETE", &format!("/api/data/products/{}", id), None)
        .await;
    let (status, body) = app
        .request("DELETE", &format!("/api/data/products/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "ALREADY_TRASHED");
}

#[tokio::test]
async fn test_aggregation() {
    let app = setup();
    app.create_model("orders", json!({"amount": {"type": "decimal"}}))
        .await;
    app.create_records(
        "orders",
        json!([
            {"amount": 1500}, {"amount": 50}, {"amount": 2000},
            {"amount": 75}, {"amount": 3500}
        ]),
    )
    .await;

    let (status, body) = app
        .request(
            "POST",
            "/api/aggregate/orders",
            Some(json!({
                "aggregations": {
                    "total": {"$sum": "amount"},
                    "n": {"$count": "*"}
                }
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "aggregate failed: {}", body);
    assert_eq!(body["data"]["total"].as_f64(), Some(7125.0));
    assert_eq!(body["data"]["n"].as_i64(), Some(5));
}

#[tokio::test]
async fn test_grouped_aggregation() {
    let app = setup();
    app.create_model(
        "orders",
        json!({"amount": {"type": "decimal"}, "status": {"type": "text"}}),
    )
    .await;
    app.create_records(
        "orders",
        json!([
            {"amount": 100, "status": "open"},
            {"amount": 200, "status": "open"},
            {"amount": 50, "status": "closed"}
        ]),
    )
    .await;

    let (status, body) = app
        .request(
            "POST",
            "/api/aggregate/orders",
            Some(json!({
                "aggregations": {"total": {"$sum": "amount"}},
                "group_by": ["status"]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn test_unknown_aggregation_rejected() {
    let app = setup();
    app.create_model("orders", json!({"amount": {"type": "decimal"}}))
        .await;
    let (status, body) = app
        .request(
            "POST",
            "/api/aggregate/orders",
            Some(json!({"aggregations": {"x": {"$median": "amount"}}})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_saved_filter_execution() {
    let app = setup();
    app.create_model("orders", json!({"amount": {"type": "decimal"}}))
        .await;
    app.create_records(
        "orders",
        json!([
            {"amount": 1500}, {"amount": 50}, {"amount": 2000},
            {"amount": 75}, {"amount": 3500}
        ]),
    )
    .await;

    app.create_records(
        "filters",
        json!([{
            "name": "high_value",
            "model_name": "orders",
            "where": {"amount": {"$gte": 1000}},
            "order": [{"field": "amount", "sort": "desc"}]
        }]),
    )
    .await;

    let (status, body) = app
        .request("POST", "/api/filters/high_value", None)
        .await;
    assert_eq!(status, StatusCode::OK, "saved filter failed: {}", body);
    let amounts: Vec<f64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["amount"].as_f64().unwrap())
        .collect();
    assert_eq!(amounts, vec![3500.0, 2000.0, 1500.0]);
}

#[tokio::test]
async fn test_history_tracking() {
    let app = setup();
    app.create_model(
        "accounts",
        json!({
            "name": {"type": "text", "tracked": true},
            "email": {"type": "text", "tracked": true},
            "status": {"type": "text"}
        }),
    )
    .await;

    let created = app
        .create_records(
            "accounts",
            json!([{"name": "Ada", "email": "ada@example.com", "status": "active"}]),
        )
        .await;
    let id = created[0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(
            "PUT",
            &format!("/api/data/accounts/{}", id),
            Some(json!({"email": "ada@strata.dev", "status": "idle"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    // the update bumped updated_at past created_at
    let created_at = body["data"]["created_at"].as_str().unwrap();
    let updated_at = body["data"]["updated_at"].as_str().unwrap();
    assert!(updated_at > created_at);

    let (status, body) = app
        .request("GET", &format!("/api/history/accounts/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().unwrap();
    assert_eq!(entries.len(), 2);

    // newest first
    assert_eq!(entries[0]["operation"], json!("update"));
    let changes = entries[0]["changes"].as_object().unwrap();
    assert!(changes.contains_key("email"));
    assert!(!changes.contains_key("status"));
    assert_eq!(changes["email"]["old"], json!("ada@example.com"));
    assert_eq!(changes["email"]["new"], json!("ada@strata.dev"));

    assert_eq!(entries[1]["operation"], json!("create"));

    // read one change by its monotonic id
    let change_id = entries[0]["change_id"].as_i64().unwrap();
    let (status, body) = app
        .request(
            "GET",
            &format!("/api/history/accounts/{}/{}", id, change_id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["operation"], json!("update"));
}

#[tokio::test]
async fn test_system_models_are_read_only() {
    let app = setup();

    // reads pass
    let (status, _) = app.request("GET", "/api/data/models", None).await;
    assert_eq!(status, StatusCode::OK);

    // writes fail, even for the root principal
    let (status, body) = app
        .request(
            "POST",
            "/api/data/users",
            Some(json!([{"name": "eve", "auth": "eve", "access": "full"}])),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "SYSTEM_MODEL_PROTECTED");

    let (status, body) = app
        .request("DELETE", "/api/describe/models", None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "SYSTEM_MODEL_PROTECTED");
}

#[tokio::test]
async fn test_non_array_create_is_invalid_body() {
    let app = setup();
    app.create_model("products", json!({"name": {"type": "text"}}))
        .await;
    let (status, body) = app
        .request("POST", "/api/data/products", Some(json!({"name": "X"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_BODY");
}

#[tokio::test]
async fn test_filter_boundaries_via_api() {
    let app = setup();
    app.create_model("products", json!({"price": {"type": "decimal"}}))
        .await;

    for bad in [
        json!({"where": {"$and": []}}),
        json!({"where": {"price": {"$between": [1]}}}),
        json!({"where": {"price": {"$wat": 1}}}),
        json!({"where": {"bad-ident": 1}}),
    ] {
        let (status, body) = app.request("POST", "/api/find/products", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "VALIDATION_ERROR");
    }

    // empty $in matches nothing, empty $nin matches everything
    app.create_records("products", json!([{"price": 1}, {"price": 2}]))
        .await;
    let (_, body) = app
        .request(
            "POST",
            "/api/find/products",
            Some(json!({"where": {"price": {"$in": []}}})),
        )
        .await;
    assert!(body["data"].as_array().unwrap().is_empty());
    let (_, body) = app
        .request(
            "POST",
            "/api/find/products",
            Some(json!({"where": {"price": {"$nin": []}}})),
        )
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_stat_access_and_pick_shaping() {
    let app = setup();
    app.create_model("products", json!({"name": {"type": "text"}}))
        .await;
    app.create_records("products", json!([{"name": "Widget"}]))
        .await;

    let (_, body) = app
        .request("GET", "/api/data/products?stat=false&access=false", None)
        .await;
    let record = &body["data"].as_array().unwrap()[0];
    assert!(record.get("created_at").is_none());
    assert!(record.get("access_read").is_none());
    assert!(record.get("name").is_some());

    let (_, body) = app
        .request("GET", "/api/data/products?pick=name", None)
        .await;
    let record = &body["data"].as_array().unwrap()[0];
    assert_eq!(record.as_object().unwrap().len(), 1);
    assert_eq!(record["name"], json!("Widget"));
}

#[tokio::test]
async fn test_count_endpoint() {
    let app = setup();
    app.create_model("products", json!({"price": {"type": "decimal"}}))
        .await;
    app.create_records(
        "products",
        json!([{"price": 5}, {"price": 15}, {"price": 25}]),
    )
    .await;

    let (status, body) = app
        .request(
            "POST",
            "/api/count/products",
            Some(json!({"where": {"price": {"$gt": 10}}})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"].as_i64(), Some(2));
}

#[tokio::test]
async fn test_binary_field_round_trip() {
    let app = setup();
    app.create_model(
        "attachments",
        json!({
            "name": {"type": "text"},
            "data": {"type": "binary"}
        }),
    )
    .await;

    // "hello" in base64
    let created = app
        .create_records(
            "attachments",
            json!([{"name": "greeting.txt", "data": "aGVsbG8="}]),
        )
        .await;
    let id = created[0]["id"].as_str().unwrap();

    let (status, body) = app
        .request("GET", &format!("/api/data/attachments/{}", id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["data"], json!("aGVsbG8="));

    // malformed payloads are rejected before any SQL runs
    let (status, body) = app
        .request(
            "POST",
            "/api/data/attachments",
            Some(json!([{"name": "bad", "data": "not base64!!"}])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_missing_model_is_404() {
    let app = setup();
    let (status, body) = app.request("GET", "/api/data/ghosts", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "MODEL_NOT_FOUND");
}

#[tokio::test]
async fn test_offset_without_limit_is_ignored() {
    let app = setup();
    app.create_model("products", json!({"price": {"type": "decimal"}}))
        .await;
    app.create_records("products", json!([{"price": 1}, {"price": 2}]))
        .await;
    let (_, body) = app
        .request("POST", "/api/find/products", Some(json!({"offset": 1})))
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}
