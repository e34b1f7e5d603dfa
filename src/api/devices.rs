//! Device directory handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use super::error_response;
use crate::domain::{DomainError, UpsertDeviceInput};
use crate::infrastructure::AppState;

#[utoipa::path(
    get,
    path = "/api/devices",
    responses((status = 200, description = "Registered devices"))
)]
pub async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    match state.device_repo.find_all().await {
        Ok(devices) => Json(json!({
            "total": devices.len(),
            "devices": devices
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    get,
    path = "/api/devices/{id}",
    params(("id" = String, Path, description = "Device id")),
    responses(
        (status = 200, description = "Device"),
        (status = 404, description = "Unknown device")
    )
)]
pub async fn get_device(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.device_repo.find_by_id(&id).await {
        Ok(Some(device)) => Json(json!({ "device": device })).into_response(),
        Ok(None) => error_response(DomainError::NotFound),
        Err(e) => error_response(e),
    }
}

// Create or update a device
#[utoipa::path(
    post,
    path = "/api/devices",
    responses(
        (status = 200, description = "Device created or updated"),
        (status = 400, description = "Missing id or address")
    )
)]
pub async fn upsert_device(
    State(state): State<AppState>,
    Json(payload): Json<UpsertDeviceInput>,
) -> impl IntoResponse {
    let input = match payload.validate() {
        Ok(input) => input,
        Err(e) => return error_response(e),
    };

    match state.device_repo.upsert(input).await {
        Ok(device) => (StatusCode::OK, Json(json!({ "device": device }))).into_response(),
        Err(e) => error_response(e),
    }
}
