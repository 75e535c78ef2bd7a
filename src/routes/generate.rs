use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::models::generation::{AsyncQueuedResponse, GenerateRequest, GenerateResponse};

fn body(payload: Result<Json<GenerateRequest>, JsonRejection>) -> Result<GenerateRequest, AppError> {
    payload
        .map(|Json(req)| req)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

/// POST /generate: Render and wait for the result.
pub async fn generate_image(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let (request, result) = state.generation.generate_sync(body(payload)?).await?;

    Ok(Json(GenerateResponse {
        success: true,
        request_id: request.request_id,
        image_url: result.image_url,
        image_hash: result.image_hash,
        seed_used: result.seed_used,
    }))
}

/// POST /generate-async: Admit the job and acknowledge immediately.
pub async fn generate_image_async(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<AsyncQueuedResponse>, AppError> {
    let request_id = state.generation.generate_async(body(payload)?).await?;

    Ok(Json(AsyncQueuedResponse {
        status: "queued".to_string(),
        request_id,
        message: "Image generation started in background".to_string(),
    }))
}
