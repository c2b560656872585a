use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{convert, download, handlers, middleware, status};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // The multipart body must fit the largest family cap, plus slack for
    // the non-file parts and boundaries.
    let limits = &state.config().limits;
    let body_limit = limits
        .document_max_bytes
        .max(limits.spreadsheet_max_bytes)
        .max(limits.media_max_bytes)
        .max(limits.archive_max_bytes)
        + 1024 * 1024;

    Router::new()
        .route("/convert", post(convert::convert))
        .route("/status/{id}", get(status::get_status))
        .route("/download/{id}", get(download::download))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(axum::middleware::from_fn(middleware::metrics_middleware))
        .layer(DefaultBodyLimit::max(body_limit as usize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
