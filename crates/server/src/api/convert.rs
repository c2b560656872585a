//! Convert submission endpoint.
//!
//! Validation runs before admission so malformed requests never consume
//! quota, and admission runs before enqueue so rejected requests never
//! consume queue or worker capacity.

use axum::{
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

use fileflip_core::{
    classify_tier, detect_source_format, dispatch, metrics, source_family, ConversionOptions,
    JobInput, JobStore, NewJob,
};

use crate::state::AppState;

/// Response for an accepted conversion request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertAccepted {
    pub job_id: String,
    pub status: &'static str,
    pub status_url: String,
    pub download_url: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

/// Response for a rate-limited request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimited {
    pub error: String,
    pub remaining: u32,
    pub reset_time: String,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Extract the caller's API key from `Authorization: Bearer` or `X-API-Key`.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(key) = auth_header
            .strip_prefix("Bearer ")
            .or_else(|| auth_header.strip_prefix("bearer "))
        {
            return Some(key.to_string());
        }
    }

    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Identity used for quota accounting. Keyed callers get a hash of their key
/// (the raw key never lands in job records); anonymous callers are keyed by
/// forwarded client address.
fn caller_key(headers: &HeaderMap, api_key: Option<&str>) -> String {
    if let Some(key) = api_key {
        let digest = Sha256::digest(key.as_bytes());
        return format!("key:{:x}", digest)[..20].to_string();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    match forwarded {
        Some(addr) if !addr.is_empty() => format!("ip:{}", addr),
        _ => "ip:unknown".to_string(),
    }
}

/// Submit a file for conversion
pub async fn convert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    // -------- Parse multipart fields --------
    let mut file_bytes: Option<axum::body::Bytes> = None;
    let mut filename: Option<String> = None;
    let mut target_format: Option<String> = None;
    let mut options_text: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(_) => return bad_request("malformed multipart body"),
        };

        match field.name() {
            Some("file") => {
                filename = field.file_name().map(|n| n.to_string());
                match field.bytes().await {
                    Ok(bytes) => file_bytes = Some(bytes),
                    Err(_) => return bad_request("failed to read uploaded file"),
                }
            }
            Some("target_format") => match field.text().await {
                Ok(text) => target_format = Some(text.trim().to_string()),
                Err(_) => return bad_request("failed to read target_format"),
            },
            Some("options") => match field.text().await {
                Ok(text) => options_text = Some(text),
                Err(_) => return bad_request("failed to read options"),
            },
            _ => {}
        }
    }

    // -------- Validation (never consumes quota, never creates a job) --------
    let Some(bytes) = file_bytes else {
        return bad_request("no file provided");
    };
    if bytes.is_empty() {
        return bad_request("uploaded file is empty");
    }
    let Some(filename) = filename else {
        return bad_request("file part has no filename");
    };
    let Some(target_format) = target_format.filter(|t| !t.is_empty()) else {
        return bad_request("missing target_format");
    };

    let options: ConversionOptions = match options_text {
        Some(ref text) => match serde_json::from_str(text) {
            Ok(options) => options,
            Err(e) => return bad_request(format!("malformed options: {}", e)),
        },
        None => ConversionOptions::default(),
    };

    let Some(source_format) = detect_source_format(&filename) else {
        return bad_request(format!(
            "cannot determine source format of '{}'",
            filename
        ));
    };

    // Unsupported pairs short-circuit here, before any resource is allocated.
    let plan = match dispatch(&source_format, &target_format) {
        Ok(plan) => plan,
        Err(e) => return bad_request(e.to_string()),
    };

    let family =
        source_family(&source_format).expect("dispatch succeeded, so the source format is known");
    let limit = state.upload_limit_bytes(family);
    if bytes.len() as u64 > limit {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ApiError {
                error: format!(
                    "file exceeds the {} byte limit for {} uploads",
                    limit,
                    family.as_str()
                ),
            }),
        )
            .into_response();
    }

    // -------- Admission --------
    let api_key = extract_api_key(&headers);
    let tier = classify_tier(api_key.as_deref(), &state.config().admission);
    let owner = caller_key(&headers, api_key.as_deref());

    let decision = state.admission().check(&owner, tier);
    if !decision.allowed {
        metrics::ADMISSION_REJECTED
            .with_label_values(&[tier.as_str()])
            .inc();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(RateLimited {
                error: "rate limit exceeded".to_string(),
                remaining: decision.remaining.unwrap_or(0),
                reset_time: decision.reset_at.to_rfc3339(),
            }),
        )
            .into_response();
    }

    // -------- Stage the upload --------
    let upload_dir = &state.config().storage.upload_dir;
    if tokio::fs::create_dir_all(upload_dir).await.is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: "failed to store upload".to_string(),
            }),
        )
            .into_response();
    }

    let safe_name = Path::new(&filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let staged = upload_dir.join(format!("{}_{}", uuid::Uuid::new_v4(), safe_name));

    if tokio::fs::write(&staged, &bytes).await.is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError {
                error: "failed to store upload".to_string(),
            }),
        )
            .into_response();
    }

    // -------- Enqueue --------
    let new_job = NewJob {
        owner,
        tier,
        input: JobInput {
            stored_path: staged.clone(),
            original_filename: safe_name.to_string(),
            source_format,
        },
        target_format,
        options,
    };

    match state.store().enqueue(new_job) {
        Ok(job) => {
            metrics::JOBS_ENQUEUED
                .with_label_values(&[plan.family(), tier.as_str()])
                .inc();
            (
                StatusCode::ACCEPTED,
                Json(ConvertAccepted {
                    status: "queued",
                    status_url: format!("/status/{}", job.id),
                    download_url: format!("/download/{}", job.id),
                    job_id: job.id,
                }),
            )
                .into_response()
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&staged).await;
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
