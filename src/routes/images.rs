use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;

use crate::app_state::AppState;
use crate::error::AppError;
use crate::services::storage::content_type_for;

/// GET /images/{filename}: Serve a generated image.
pub async fn get_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let bytes = state.images.read(&filename).await?;
    Ok(([(CONTENT_TYPE, content_type_for(&bytes))], bytes))
}
