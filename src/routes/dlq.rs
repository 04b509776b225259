use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{ErrorResponse, MessageResponse};
use crate::models::job::Job;
use crate::routes::jobs::into_api_error;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// GET /dlq — jobs awaiting operator action.
pub async fn list_dlq(State(state): State<AppState>) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state
        .coordinator
        .list_dlq()
        .await
        .map_err(|e| into_api_error(&state, e))?;
    Ok(Json(jobs))
}

/// POST /dlq/:id/reactivate — return a failed job to active scheduling.
pub async fn reactivate_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .coordinator
        .reactivate(id)
        .await
        .map_err(|e| into_api_error(&state, e))?;
    Ok(Json(MessageResponse {
        message: "Job reactivated".to_string(),
    }))
}

/// POST /dlq/:id/complete — resolve a failed job as if it had succeeded.
pub async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .coordinator
        .complete(id)
        .await
        .map_err(|e| into_api_error(&state, e))?;
    Ok(Json(MessageResponse {
        message: "Job marked as completed".to_string(),
    }))
}

/// DELETE /dlq/:id — drop a dead-lettered job entirely.
pub async fn delete_dlq_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .coordinator
        .delete(id)
        .await
        .map_err(|e| into_api_error(&state, e))?;
    Ok(Json(MessageResponse {
        message: "Job deleted successfully".to_string(),
    }))
}
