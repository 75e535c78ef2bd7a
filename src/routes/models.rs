use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
    pub current: String,
}

/// GET /models: Checkpoints available on the backend. An unreachable
/// backend yields an empty list rather than an error.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = state.backend.list_models().await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to list models");
        Vec::new()
    });

    Json(ModelsResponse {
        models,
        current: state.config.model_name.clone(),
    })
}
