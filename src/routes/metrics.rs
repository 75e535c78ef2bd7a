use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every metric the service emits.
pub fn describe_metrics() {
    metrics::describe_counter!("generation_requests_total", "Generation requests received");
    metrics::describe_counter!(
        "generation_rejected_total",
        "Requests refused by the prompt safety filter, by reason"
    );
    metrics::describe_counter!("generation_jobs_submitted", "Async jobs admitted");
    metrics::describe_counter!("generation_jobs_completed", "Async jobs completed");
    metrics::describe_counter!("generation_jobs_failed", "Async jobs failed, by backend error kind");
    metrics::describe_counter!(
        "callback_deliveries_total",
        "Callback delivery outcomes (delivered or exhausted)"
    );
    metrics::describe_gauge!("generation_jobs_active", "Jobs not yet settled");
    metrics::describe_histogram!("backend_render_seconds", "Wall-clock time of successful renders");
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
