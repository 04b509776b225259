use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics — Prometheus text exposition of scheduler metrics.
pub async fn prometheus_metrics(
    axum::extract::State(handle): axum::extract::State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    handle.render()
}
