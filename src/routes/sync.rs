//! Sync API endpoints
//!
//! Batch and single-operation synchronization plus per-device status.
//! Every endpoint requires a bearer token; the batch and operation
//! endpoints additionally require the submitting device's id in the
//! request body.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::auth::authenticate;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::sync::{
    BatchSyncRequest, BatchSyncResponse, SingleSyncOutcome, SingleSyncRequest, SingleSyncResponse,
    SyncEngine, SyncStatusResponse,
};

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/batch", post(batch_sync))
        .route("/operation", post(single_operation))
        .route("/status", get(sync_status))
}

/// Apply a batch of operations and return everything the device missed
async fn batch_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BatchSyncRequest>,
) -> Result<Json<BatchSyncResponse>> {
    let user = authenticate(state.verifier(), &headers).await?;
    let device_id = required_device_id(req.device_id.as_deref())?;

    let engine = SyncEngine::new(state.db(), state.hub());
    let response = engine
        .apply_batch(user.user_id, device_id, req.last_sync_version, &req.operations)
        .await?;

    if !response.conflicts.is_empty() {
        tracing::info!(
            user_id = user.user_id,
            device_id = %device_id,
            conflicts = response.conflicts.len(),
            "Batch sync completed with conflicts"
        );
    }

    Ok(Json(response))
}

/// Apply one operation and push it live to the user's other devices
async fn single_operation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SingleSyncRequest>,
) -> Result<(StatusCode, Json<SingleSyncResponse>)> {
    let user = authenticate(state.verifier(), &headers).await?;
    let device_id = required_device_id(req.device_id.as_deref())?;
    let operation = req
        .operation
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("Operation is required".to_string()))?;

    let engine = SyncEngine::new(state.db(), state.hub());
    match engine
        .apply_single(user.user_id, device_id, req.last_sync_version, operation)
        .await?
    {
        SingleSyncOutcome::Accepted(response) => Ok((StatusCode::OK, Json(response))),
        SingleSyncOutcome::Conflict(response) => Ok((StatusCode::CONFLICT, Json(response))),
    }
}

/// Query parameters for the status endpoint
#[derive(Deserialize)]
struct StatusQuery {
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
}

/// Report sync progress for one device
///
/// Defaults to the device the presented token belongs to; an explicit
/// `deviceId` query parameter inspects another device's cursor.
async fn sync_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> Result<Json<SyncStatusResponse>> {
    let user = authenticate(state.verifier(), &headers).await?;
    let device_id = query
        .device_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .unwrap_or(&user.device_id);

    let engine = SyncEngine::new(state.db(), state.hub());
    let status = engine.status(user.user_id, device_id).await?;
    Ok(Json(status))
}

fn required_device_id(device_id: Option<&str>) -> Result<&str> {
    device_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("Device ID is required".to_string()))
}
