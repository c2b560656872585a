//! Result download endpoint.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use fileflip_core::{downloadable, DownloadRejection, JobStore};

use crate::api::convert::ApiError;
use crate::state::AppState;

/// Download the converted file of a completed job
pub async fn download(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let job = match state.store().get(&id) {
        Ok(Some(job)) => job,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiError {
                    error: format!("job not found: {}", id),
                }),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    let result = match downloadable(&job) {
        Ok(result) => result.clone(),
        Err(DownloadRejection::NotReady(current_state)) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: format!("job is not completed (state: {})", current_state),
                }),
            )
                .into_response();
        }
    };

    let file = match tokio::fs::File::open(&result.output_path).await {
        Ok(file) => file,
        Err(_) => {
            // The result file was reaped by retention; the job id is
            // effectively expired.
            return (
                StatusCode::NOT_FOUND,
                Json(ApiError {
                    error: format!("result for job {} is no longer available", id),
                }),
            )
                .into_response();
        }
    };

    let stream = ReaderStream::new(file);
    let disposition = format!(
        "attachment; filename=\"{}\"",
        result.filename.replace(['"', '\r', '\n'], "_")
    );

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, result.mime_type)
        .header(header::CONTENT_LENGTH, result.size_bytes.to_string())
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(stream))
        .unwrap()
}
