use axum::extract::{Path, State};
use axum::Json;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::job::JobStatusResponse;

/// GET /jobs/{request_id}: Snapshot of an async job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let job = state.generation.job_status(&request_id)?;
    Ok(Json(job.into()))
}
