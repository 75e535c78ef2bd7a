use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sd_gateway::app_state::AppState;
use sd_gateway::config::AppConfig;
use sd_gateway::routes;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing sd-gateway server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    routes::metrics::describe_metrics();

    let bind_addr = config.bind_addr.clone();
    let retention = config.job_retention();

    let state = AppState::from_config(config).expect("Failed to initialize application state");

    // Jobs are process-lifetime only; settled ones are pruned after retention.
    state.generation.coordinator().spawn_reaper(retention);

    let app = routes::router(state, Some(Arc::new(prometheus_handle)));

    tracing::info!("Starting sd-gateway on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
