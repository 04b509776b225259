use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    ErrorResponse, JobInput, JobResponse, ListJobsQuery, MessageResponse, ToggleStatusRequest,
};
use crate::models::job::Job;
use crate::services::coordinator::CoordinatorError;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a coordinator failure onto the REST error contract. Infrastructure
/// details are only exposed outside production.
pub(crate) fn into_api_error(state: &AppState, err: CoordinatorError) -> ApiError {
    let status = match &err {
        CoordinatorError::Validation(_)
        | CoordinatorError::InvalidSchedule(_)
        | CoordinatorError::SpecificTimeInPast => StatusCode::BAD_REQUEST,
        CoordinatorError::NotFound => StatusCode::NOT_FOUND,
        CoordinatorError::Conflict => StatusCode::CONFLICT,
        CoordinatorError::Database(_) | CoordinatorError::Queue(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let error = if status == StatusCode::INTERNAL_SERVER_ERROR && !state.detailed_errors {
        "Internal server error".to_string()
    } else {
        err.to_string()
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "Request failed");
    }
    (status, Json(ErrorResponse { error }))
}

fn bad_request(message: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error: message }),
    )
}

/// POST /jobs — register a new job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<JobInput>,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    input.validate().map_err(|e| bad_request(e.to_string()))?;

    let job = state
        .coordinator
        .create(&input)
        .await
        .map_err(|e| into_api_error(&state, e))?;

    Ok((
        StatusCode::CREATED,
        Json(JobResponse {
            message: "Job created successfully".to_string(),
            job,
        }),
    ))
}

/// GET /jobs — list jobs, optionally filtered by status.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state
        .coordinator
        .list(query.status)
        .await
        .map_err(|e| into_api_error(&state, e))?;
    Ok(Json(jobs))
}

/// GET /jobs/:id — fetch one job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .coordinator
        .get(id)
        .await
        .map_err(|e| into_api_error(&state, e))?;
    Ok(Json(job))
}

/// PUT /jobs/:id — replace a job's definition and reschedule it.
pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<JobInput>,
) -> Result<Json<JobResponse>, ApiError> {
    input.validate().map_err(|e| bad_request(e.to_string()))?;

    let job = state
        .coordinator
        .update(id, &input)
        .await
        .map_err(|e| into_api_error(&state, e))?;

    Ok(Json(JobResponse {
        message: "Job updated successfully".to_string(),
        job,
    }))
}

/// DELETE /jobs/:id — remove a job and all of its queue entries.
pub async fn delete_job(
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

/// POST /jobs/:id/run — enqueue an immediate manual dispatch.
pub async fn run_job_now(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .coordinator
        .run_now(id)
        .await
        .map_err(|e| into_api_error(&state, e))?;
    Ok(Json(MessageResponse {
        message: "Job queued for immediate execution".to_string(),
    }))
}

/// PATCH /jobs/:id/status — toggle between ACTIVE and INACTIVE.
pub async fn toggle_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ToggleStatusRequest>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .coordinator
        .toggle_status(id, request.status)
        .await
        .map_err(|e| into_api_error(&state, e))?;
    Ok(Json(job))
}
