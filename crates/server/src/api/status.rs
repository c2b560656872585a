//! Job status endpoint.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use fileflip_core::{JobStatus, JobStore};

use crate::api::convert::ApiError;
use crate::state::AppState;

/// Get the status of a job
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, impl IntoResponse> {
    match state.store().get(&id) {
        Ok(Some(job)) => Ok(Json(JobStatus::from(&job))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiError {
                error: format!("job not found: {}", id),
            }),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: e.to_string(),
            }),
        )),
    }
}
