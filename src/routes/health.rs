use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model: String,
    pub safety_enabled: bool,
    pub active_jobs: usize,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub backend: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

/// GET /health: Liveness plus rendering backend reachability.
///
/// Always 200 while the process is serving; a down backend is reported as
/// `degraded` since queued jobs and status queries still work.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let backend_check = match state.backend.health().await {
        Ok(()) => ComponentHealth {
            status: "ok".to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Backend health check failed");
            ComponentHealth {
                status: "unreachable".to_string(),
                latency_ms: None,
            }
        }
    };

    let healthy = backend_check.status == "ok";
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.config.model_name.clone(),
        safety_enabled: state.generation.safety_enabled(),
        active_jobs: state.generation.coordinator().active_jobs(),
        checks: HealthChecks {
            backend: backend_check,
        },
    };

    (StatusCode::OK, Json(response))
}
