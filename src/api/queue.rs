//! Read-only queue inspection and maintenance

use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use super::error_response;
use crate::domain::{DomainError, QueueEntryFilter};
use crate::infrastructure::AppState;

#[derive(Debug, Deserialize)]
pub struct ListEntriesQuery {
    pub device_id: Option<String>,
    pub change_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    pub max_age_hours: u64,
}

#[utoipa::path(
    get,
    path = "/api/queue/status",
    responses((status = 200, description = "Queued/processing totals and per-device queue lengths"))
)]
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.queue.status().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    get,
    path = "/api/queue/entries",
    params(
        ("device_id" = Option<String>, Query, description = "Only this device"),
        ("change_id" = Option<String>, Query, description = "Only this change request")
    ),
    responses((status = 200, description = "Queue entries in FIFO order"))
)]
pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<ListEntriesQuery>,
) -> impl IntoResponse {
    let filter = QueueEntryFilter {
        device_id: query.device_id,
        change_id: query.change_id,
    };

    match state.queue.entries(filter).await {
        Ok(entries) => Json(json!({
            "total": entries.len(),
            "entries": entries
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    get,
    path = "/api/queue/devices/{device_id}",
    params(("device_id" = String, Path, description = "Device id")),
    responses((status = 200, description = "Queue length and worker state for the device"))
)]
pub async fn get_device_queue(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    match state.queue.queue_length(&device_id).await {
        Ok(queue_length) => Json(json!({
            "device_id": device_id,
            "queue_length": queue_length,
            "is_processing": state.queue.is_processing(&device_id).await
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/queue/cleanup",
    responses(
        (status = 200, description = "Number of finished entries removed"),
        (status = 400, description = "max_age_hours out of range")
    )
)]
pub async fn cleanup(
    State(state): State<AppState>,
    Json(payload): Json<CleanupRequest>,
) -> impl IntoResponse {
    let Some(seconds) = payload.max_age_hours.checked_mul(3600) else {
        return error_response(DomainError::Validation(
            "max_age_hours out of range".to_string(),
        ));
    };

    match state
        .queue
        .cleanup_old_entries(Duration::from_secs(seconds))
        .await
    {
        Ok(removed) => Json(json!({ "removed": removed })).into_response(),
        Err(e) => error_response(e),
    }
}
