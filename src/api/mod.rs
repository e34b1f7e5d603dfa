pub mod changes;
pub mod devices;
pub mod health;
pub mod queue;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use crate::domain::DomainError;
use crate::infrastructure::AppState;

pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Devices
        .route(
            "/devices",
            get(devices::list_devices).post(devices::upsert_device),
        )
        .route("/devices/:id", get(devices::get_device))
        // Change requests
        .route(
            "/changes",
            get(changes::list_changes).post(changes::create_change),
        )
        .route(
            "/changes/execute-approved",
            post(changes::execute_all_approved),
        )
        .route("/changes/:id", get(changes::get_change))
        .route("/changes/:id/approve", post(changes::approve_change))
        .route("/changes/:id/reject", post(changes::reject_change))
        .route("/changes/:id/execute", post(changes::execute_change))
        .route("/changes/:id/annotations", post(changes::annotate_change))
        // Queue
        .route("/queue/status", get(queue::get_status))
        .route("/queue/entries", get(queue::list_entries))
        .route("/queue/devices/:device_id", get(queue::get_device_queue))
        .route("/queue/cleanup", post(queue::cleanup))
        .with_state(state)
}

/// Map a domain error onto an HTTP status with a JSON body
pub(crate) fn error_response(e: DomainError) -> Response {
    let status = match &e {
        DomainError::NotFound => StatusCode::NOT_FOUND,
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::External(_) => StatusCode::BAD_GATEWAY,
        DomainError::Database(_) | DomainError::Internal(_) => {
            tracing::error!("Request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (status, Json(json!({ "error": e.to_string() }))).into_response()
}
