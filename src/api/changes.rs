//! Change request handlers: create, review, execute

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

use super::error_response;
use crate::domain::{ChangeFilter, ChangeStatus, CreateChangeInput};
use crate::infrastructure::AppState;

#[derive(Debug, Deserialize)]
pub struct ListChangesQuery {
    pub device_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub reviewer: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reviewer: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnnotateRequest {
    pub author: String,
    pub note: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteApprovedRequest {
    pub device_id: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/changes",
    params(
        ("device_id" = Option<String>, Query, description = "Only this device"),
        ("status" = Option<String>, Query, description = "Only this status")
    ),
    responses(
        (status = 200, description = "Change requests, oldest first"),
        (status = 400, description = "Unknown status")
    )
)]
pub async fn list_changes(
    State(state): State<AppState>,
    Query(query): Query<ListChangesQuery>,
) -> impl IntoResponse {
    let status = match query.status.as_deref().map(str::parse::<ChangeStatus>) {
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => return error_response(e),
        None => None,
    };

    let filter = ChangeFilter {
        device_id: query.device_id,
        status,
    };

    match state.changes.list(filter).await {
        Ok(changes) => Json(json!({
            "total": changes.len(),
            "changes": changes
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/changes",
    responses(
        (status = 201, description = "Change request created as pending"),
        (status = 400, description = "Malformed request or unknown dependency")
    )
)]
pub async fn create_change(
    State(state): State<AppState>,
    Json(payload): Json<CreateChangeInput>,
) -> impl IntoResponse {
    match state.changes.create(payload).await {
        Ok(change) => (
            StatusCode::CREATED,
            Json(json!({
                "change": change,
                "message": "Change request created"
            })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    get,
    path = "/api/changes/{id}",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Change request"),
        (status = 404, description = "Unknown change request")
    )
)]
pub async fn get_change(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.changes.get(&id).await {
        Ok(change) => Json(json!({ "change": change })).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/changes/{id}/approve",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Approved"),
        (status = 400, description = "Request is not pending"),
        (status = 404, description = "Unknown change request")
    )
)]
pub async fn approve_change(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ApproveRequest>,
) -> impl IntoResponse {
    match state
        .changes
        .approve(&id, &payload.reviewer, payload.notes)
        .await
    {
        Ok(change) => Json(json!({
            "change": change,
            "message": "Change request approved"
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/changes/{id}/reject",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Rejected (cancelled)"),
        (status = 400, description = "Request is not pending"),
        (status = 404, description = "Unknown change request")
    )
)]
pub async fn reject_change(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<RejectRequest>,
) -> impl IntoResponse {
    match state
        .changes
        .reject(&id, &payload.reviewer, payload.reason)
        .await
    {
        Ok(change) => Json(json!({
            "change": change,
            "message": "Change request rejected"
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// Runs the change and waits for the device's answer. A device-side failure is
/// still a 200: the body carries `success: false` and the error text.
#[utoipa::path(
    post,
    path = "/api/changes/{id}/execute",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Execution finished (see success flag)"),
        (status = 400, description = "Not approved, unmet dependencies or unknown device"),
        (status = 404, description = "Unknown change request")
    )
)]
pub async fn execute_change(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.changes.execute(&id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/changes/execute-approved",
    responses((status = 200, description = "Per-request results with executed/failed/skipped counts"))
)]
pub async fn execute_all_approved(
    State(state): State<AppState>,
    payload: Option<Json<ExecuteApprovedRequest>>,
) -> impl IntoResponse {
    let device_id = payload.and_then(|Json(p)| p.device_id);

    match state.changes.execute_all_approved(device_id).await {
        Ok(report) => Json(json!({
            "results": report.results,
            "skipped": report.skipped,
            "executed": report.executed,
            "failed": report.failed,
            "skipped_count": report.skipped.len()
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

#[utoipa::path(
    post,
    path = "/api/changes/{id}/annotations",
    params(("id" = String, Path, description = "Change request id")),
    responses(
        (status = 200, description = "Annotation appended"),
        (status = 400, description = "Missing author or note"),
        (status = 404, description = "Unknown change request")
    )
)]
pub async fn annotate_change(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<AnnotateRequest>,
) -> impl IntoResponse {
    match state
        .changes
        .annotate(&id, &payload.author, &payload.note)
        .await
    {
        Ok(change) => Json(json!({ "change": change })).into_response(),
        Err(e) => error_response(e),
    }
}
