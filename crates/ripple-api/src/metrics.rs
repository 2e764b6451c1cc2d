//! Prometheus metrics for Ripple
//!
//! Exposes metrics at `/metrics` endpoint in Prometheus format.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

use crate::server::AppState;

/// Metric names
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "ripple_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "ripple_http_request_duration_seconds";

    // Event metrics
    pub const EVENTS_DISPATCHED_TOTAL: &str = "ripple_events_dispatched_total";
    pub const EVENTS_DROPPED_TOTAL: &str = "ripple_events_dropped_total";
    pub const EVENTS_FORWARDED_TOTAL: &str = "ripple_events_forwarded_total";
    pub const ACTIVE_LISTENERS: &str = "ripple_active_listeners";
    pub const WEBHOOK_FAILURES_TOTAL: &str = "ripple_webhook_failures_total";

    // Cluster metrics
    pub use ripple_cluster::PEER_BROADCAST_FAILURES_TOTAL;

    // System metrics
    pub const UPTIME_SECONDS: &str = "ripple_uptime_seconds";
    pub const INFO: &str = "ripple_info";
}

/// Metrics recorder
pub struct MetricsRecorder {
    handle: PrometheusHandle,
    start_time: Instant,
}

impl MetricsRecorder {
    /// Install the global Prometheus recorder
    pub fn install() -> ripple_core::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ripple_core::Error::InternalError(format!("Failed to install Prometheus recorder: {}", e))
        })?;

        gauge!(names::INFO, "version" => ripple_core::VERSION).set(1.0);

        Ok(Self {
            handle,
            start_time: Instant::now(),
        })
    }

    /// A recorder that is not installed globally; renders an empty exposition
    pub fn detached() -> Self {
        Self {
            handle: PrometheusBuilder::new().build_recorder().handle(),
            start_time: Instant::now(),
        }
    }

    /// Get metrics output in Prometheus format
    pub fn render(&self) -> String {
        gauge!(names::UPTIME_SECONDS).set(self.start_time.elapsed().as_secs_f64());
        self.handle.render()
    }
}

/// Record an HTTP request
pub fn record_http_request(method: &str, route: &str, status: u16, duration_secs: f64) {
    counter!(
        names::HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status_class" => format!("{}xx", status / 100)
    )
    .increment(1);

    histogram!(
        names::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string()
    )
    .record(duration_secs);
}

/// Metrics middleware for tracking HTTP requests
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    // Streaming responses are counted when headers go out
    record_http_request(
        &method,
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let output = state.metrics.render();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}
