//! Health and metrics endpoints.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use fileflip_core::{check_required_tools, HealthReport, JobStore};

use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

/// Aggregate liveness: external binaries, queue depth, degraded mode.
/// Non-2xx when a required binary is missing or the pool is stopped.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let tools = check_required_tools(&state.config().tools).await;
    let queue = state.store().counts().unwrap_or_default();

    let report = HealthReport::new(
        tools,
        queue,
        state.store().is_degraded(),
        state.pool().status().running,
    );

    let code = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(report)).into_response()
}

/// Prometheus metrics in text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
