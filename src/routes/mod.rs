use axum::routing::{get, post};
use axum::{middleware, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub mod auth;
pub mod generate;
pub mod health;
pub mod images;
pub mod jobs;
pub mod metrics;
pub mod models;

/// Build the HTTP router. `/health` and `/metrics` are unauthenticated.
pub fn router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let protected = Router::new()
        .route("/models", get(models::list_models))
        .route("/generate", post(generate::generate_image))
        .route("/generate-async", post(generate::generate_image_async))
        .route("/jobs/{request_id}", get(jobs::get_job_status))
        .route("/images/{filename}", get(images::get_image))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .merge(protected)
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
}
