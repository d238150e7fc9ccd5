//! End-to-end tests for the sync API
//!
//! Drives the real router and state over in-memory SQLite, exercising
//! the batch and single-operation protocols the way a browser-extension
//! client would.

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use tabstash_server::auth::StaticTokenVerifier;
use tabstash_server::config::Config;
use tabstash_server::db::{initialize_schema, CollectionRepository, TabRepository};
use tabstash_server::routes;
use tabstash_server::state::AppState;
use tabstash_server::sync::{BatchSyncResponse, SingleSyncResponse, SyncStatusResponse};

// user 1 owns devices phone and laptop; user 2 is a stranger
const TOKENS: &str = "alpha:1:phone,beta:1:laptop,gamma:2:tablet";

async fn setup() -> (TestServer, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .unwrap();
    initialize_schema(&pool).await.unwrap();

    let verifier = Arc::new(StaticTokenVerifier::from_spec(TOKENS));
    let state = AppState::new(Config::default(), pool.clone(), verifier);
    let server = TestServer::new(routes::app(state)).unwrap();
    (server, pool)
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

fn add_collection_op(id: &str, title: &str) -> Value {
    json!({
        "type": "ADD",
        "entityType": "collection",
        "entityId": id,
        "data": {"title": title, "order": 0}
    })
}

#[tokio::test]
async fn test_health_check() {
    let (server, _pool) = setup().await;

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["service"], json!("tabstash-server"));
}

#[tokio::test]
async fn test_batch_requires_token() {
    let (server, _pool) = setup().await;

    let response = server
        .post("/api/sync/batch")
        .json(&json!({"deviceId": "phone", "lastSyncVersion": 0, "operations": []}))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    let response = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("wrong"))
        .json(&json!({"deviceId": "phone", "lastSyncVersion": 0, "operations": []}))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_batch_requires_device_id() {
    let (server, _pool) = setup().await;

    let response = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({"lastSyncVersion": 0, "operations": []}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], json!("bad_request"));
}

#[tokio::test]
async fn test_add_collection_roundtrip() {
    let (server, pool) = setup().await;

    let response = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [add_collection_op("c1", "Work")]
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: BatchSyncResponse = response.json();
    assert!(body.server_version > 0);
    assert_eq!(body.operations.len(), 1);
    assert_eq!(body.operations[0].entity_id, "c1");
    assert!(body.conflicts.is_empty());

    let created = CollectionRepository::new(&pool)
        .find(1, "c1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.title, "Work");

    // The identical retry neither duplicates nor conflicts
    let retry = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [add_collection_op("c1", "Work")]
        }))
        .await;

    assert_eq!(retry.status_code(), StatusCode::OK);
    let retry_body: BatchSyncResponse = retry.json();
    assert!(retry_body.conflicts.is_empty());
    assert!(retry_body.operations.is_empty());
}

#[tokio::test]
async fn test_stale_update_reports_conflict() {
    let (server, pool) = setup().await;

    let seeded: BatchSyncResponse = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [add_collection_op("c1", "Original")]
        }))
        .await
        .json();

    let response = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("beta"))
        .json(&json!({
            "deviceId": "laptop",
            "lastSyncVersion": seeded.server_version,
            "operations": [{
                "type": "UPDATE",
                "entityType": "collection",
                "entityId": "c1",
                "data": {"title": "Renamed", "order": 0},
                "clientVersion": seeded.server_version + 1
            }]
        }))
        .await;

    // Conflicts are informational; the batch still succeeds
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: BatchSyncResponse = response.json();
    assert_eq!(body.conflicts.len(), 1);
    assert_eq!(body.conflicts[0].server_data["version"], json!(seeded.server_version));
    assert_eq!(body.conflicts[0].server_data["title"], json!("Original"));
    assert_eq!(body.conflicts[0].client_data["title"], json!("Renamed"));

    let unchanged = CollectionRepository::new(&pool)
        .find(1, "c1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.title, "Original");
}

#[tokio::test]
async fn test_matching_update_applies() {
    let (server, pool) = setup().await;

    let seeded: BatchSyncResponse = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [add_collection_op("c1", "Original")]
        }))
        .await
        .json();

    let response: BatchSyncResponse = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": seeded.server_version,
            "operations": [{
                "type": "UPDATE",
                "entityType": "collection",
                "entityId": "c1",
                "data": {"title": "Renamed", "order": 2},
                "clientVersion": seeded.server_version
            }]
        }))
        .await
        .json();

    assert!(response.conflicts.is_empty());
    assert!(response.server_version > seeded.server_version);

    let updated = CollectionRepository::new(&pool)
        .find(1, "c1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.title, "Renamed");
    assert_eq!(updated.order_num, 2);
    assert_eq!(updated.version, response.server_version);
}

#[tokio::test]
async fn test_delete_cascades_to_tabs() {
    let (server, pool) = setup().await;

    server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [
                add_collection_op("c1", "Work"),
                {
                    "type": "ADD",
                    "entityType": "tab",
                    "entityId": "t1",
                    "collectionId": "c1",
                    "data": {"title": "Docs", "url": "https://example.com", "sort_order": 0}
                }
            ]
        }))
        .await;

    let response: BatchSyncResponse = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [{
                "type": "DELETE",
                "entityType": "collection",
                "entityId": "c1"
            }]
        }))
        .await
        .json();

    assert!(response.conflicts.is_empty());
    assert!(CollectionRepository::new(&pool).find(1, "c1").await.unwrap().is_none());
    assert!(TabRepository::new(&pool).find(1, "c1", "t1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_batch_continues_past_conflict() {
    let (server, pool) = setup().await;

    server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [add_collection_op("c1", "First")]
        }))
        .await;

    let response: BatchSyncResponse = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [
                {
                    "type": "UPDATE",
                    "entityType": "collection",
                    "entityId": "c1",
                    "data": {"title": "Stale"},
                    "clientVersion": 999
                },
                add_collection_op("c2", "Second")
            ]
        }))
        .await
        .json();

    assert_eq!(response.conflicts.len(), 1);
    assert!(CollectionRepository::new(&pool).find(1, "c2").await.unwrap().is_some());
}

#[tokio::test]
async fn test_operations_propagate_across_devices_not_users() {
    let (server, _pool) = setup().await;

    let seeded: BatchSyncResponse = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [add_collection_op("c1", "Shared")]
        }))
        .await
        .json();

    // The same user's other device pulls with an empty batch
    let laptop: BatchSyncResponse = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("beta"))
        .json(&json!({"deviceId": "laptop", "lastSyncVersion": 0, "operations": []}))
        .await
        .json();

    assert_eq!(laptop.operations.len(), 1);
    assert_eq!(laptop.operations[0].entity_id, "c1");
    assert_eq!(laptop.server_version, seeded.server_version);

    // A different user sees nothing
    let stranger: BatchSyncResponse = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("gamma"))
        .json(&json!({"deviceId": "tablet", "lastSyncVersion": 0, "operations": []}))
        .await
        .json();

    assert!(stranger.operations.is_empty());
}

#[tokio::test]
async fn test_tab_operation_without_parent_is_skipped() {
    let (server, pool) = setup().await;

    let response = server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [{
                "type": "ADD",
                "entityType": "tab",
                "entityId": "t1",
                "collectionId": "deleted-elsewhere",
                "data": {"title": "Orphan", "url": "https://example.com"}
            }]
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: BatchSyncResponse = response.json();
    assert!(body.conflicts.is_empty());
    assert!(body.operations.is_empty());
    assert!(TabRepository::new(&pool)
        .find(1, "deleted-elsewhere", "t1")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_single_operation_success() {
    let (server, _pool) = setup().await;

    let response = server
        .post("/api/sync/operation")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operation": add_collection_op("c1", "Work")
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: SingleSyncResponse = response.json();
    assert!(body.server_version > 0);
    let operation = body.operation.unwrap();
    assert_eq!(operation.entity_id, "c1");
    assert_eq!(operation.version, body.server_version);
    assert!(body.conflict.is_none());
}

#[tokio::test]
async fn test_single_operation_conflict_is_409() {
    let (server, pool) = setup().await;

    let seeded: SingleSyncResponse = server
        .post("/api/sync/operation")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operation": add_collection_op("c1", "Original")
        }))
        .await
        .json();

    let response = server
        .post("/api/sync/operation")
        .add_header(header::AUTHORIZATION, bearer("beta"))
        .json(&json!({
            "deviceId": "laptop",
            "lastSyncVersion": 1,
            "operation": {
                "type": "UPDATE",
                "entityType": "collection",
                "entityId": "c1",
                "data": {"title": "Stale"},
                "clientVersion": 999
            }
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: SingleSyncResponse = response.json();
    assert_eq!(body.server_version, 1);
    assert!(body.operation.is_none());
    let conflict = body.conflict.unwrap();
    assert_eq!(conflict.entity_id, "c1");
    assert_eq!(conflict.server_data["version"], json!(seeded.server_version));

    let unchanged = CollectionRepository::new(&pool)
        .find(1, "c1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.title, "Original");
}

#[tokio::test]
async fn test_single_operation_requires_body_fields() {
    let (server, _pool) = setup().await;

    let response = server
        .post("/api/sync/operation")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({"deviceId": "phone", "lastSyncVersion": 0}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = server
        .post("/api/sync/operation")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "lastSyncVersion": 0,
            "operation": add_collection_op("c1", "Work")
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_tracks_device_cursor() {
    let (server, _pool) = setup().await;

    server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("alpha"))
        .json(&json!({
            "deviceId": "phone",
            "lastSyncVersion": 0,
            "operations": [add_collection_op("c1", "One"), add_collection_op("c2", "Two")]
        }))
        .await;

    // The laptop has not pulled yet
    let status: SyncStatusResponse = server
        .get("/api/sync/status")
        .add_header(header::AUTHORIZATION, bearer("beta"))
        .await
        .json();
    assert_eq!(status.server_version, 2);
    assert_eq!(status.last_sync_version, 0);
    assert_eq!(status.pending_operations, 2);

    server
        .post("/api/sync/batch")
        .add_header(header::AUTHORIZATION, bearer("beta"))
        .json(&json!({"deviceId": "laptop", "lastSyncVersion": 0, "operations": []}))
        .await;

    let status: SyncStatusResponse = server
        .get("/api/sync/status")
        .add_header(header::AUTHORIZATION, bearer("beta"))
        .await
        .json();
    assert_eq!(status.last_sync_version, 2);
    assert_eq!(status.pending_operations, 0);
    assert!(status.last_sync_time.is_some());

    // Any device's cursor can be inspected by name
    let phone: SyncStatusResponse = server
        .get("/api/sync/status?deviceId=phone")
        .add_header(header::AUTHORIZATION, bearer("beta"))
        .await
        .json();
    assert_eq!(phone.last_sync_version, 2);
}
