use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for every metric the service emits.
pub fn describe() {
    metrics::describe_counter!(
        "analysis_jobs_submitted_total",
        "Analysis jobs accepted for processing"
    );
    metrics::describe_counter!(
        "analysis_jobs_completed_total",
        "Analysis jobs that produced a result"
    );
    metrics::describe_counter!(
        "analysis_jobs_failed_total",
        "Analysis jobs that ended in an error"
    );
    metrics::describe_counter!(
        "analysis_rejected_uploads_total",
        "Uploads rejected by validation"
    );
    metrics::describe_histogram!(
        "analysis_inference_seconds",
        "Time spent reading the upload and calling the inference service"
    );
    metrics::describe_gauge!(
        "analysis_jobs_in_flight",
        "Analysis jobs currently running"
    );
}

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
