//! Player-facing helpers: progress polling and seek prioritization

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use undertow_core::{ByteRange, ContentId, EngineError, SessionState};

use super::{ApiError, parse_file_index};
use crate::server::AppState;

/// Bytes fetched ahead of everything else after a seek.
pub const PRIORITY_WINDOW_BYTES: u64 = 16 * 1024 * 1024;

/// Seek percentages above this are acknowledged but not prioritized.
pub const SEEK_END_THRESHOLD: f64 = 99.5;

const PRIORITIZE_METADATA_WAIT: Duration = Duration::from_secs(3);

/// `GET /progress/{identifier}/{file_idx}`
pub async fn file_progress(
    State(state): State<AppState>,
    Path((identifier, file_idx)): Path<(String, String)>,
) -> Response {
    let Some(file_idx) = parse_file_index(&file_idx) else {
        return ApiError::bad_request("Invalid file index").into_response();
    };

    state
        .progress
        .report(&identifier, file_idx)
        .await
        .into_response()
}

/// Body of `POST /prioritize`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrioritizeRequest {
    #[serde(alias = "infoHash")]
    pub identifier: String,
    pub file_idx: usize,
    /// Seek position as a percentage of the file length
    pub percentage: f64,
}

/// `POST /prioritize`: fetches the bytes after a seek position first.
pub async fn prioritize(
    State(state): State<AppState>,
    body: Result<Json<PrioritizeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|_| ApiError::bad_request("Invalid request format"))?;
    if !(0.0..=100.0).contains(&request.percentage) {
        return Err(ApiError::bad_request("percentage must be between 0 and 100"));
    }

    let identifier =
        ContentId::parse(&request.identifier).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let session = state
        .registry
        .find(&identifier)
        .ok_or_else(|| ApiError::not_found("Torrent not found"))?;

    if session.settle_within(PRIORITIZE_METADATA_WAIT).await != SessionState::Ready {
        return Err(ApiError::unavailable("Waiting for torrent metadata"));
    }

    let file = session
        .file(request.file_idx)
        .ok_or_else(|| ApiError::bad_request("File index out of range"))?;
    let Some(last) = file.length.checked_sub(1) else {
        return Ok(Json(json!({ "message": "File has zero length, nothing to prioritize" }))
            .into_response());
    };

    let seek_position = ((file.length as f64 * request.percentage / 100.0) as u64).min(last);
    if request.percentage > SEEK_END_THRESHOLD {
        debug!(
            "Ignoring seek to {:.2}% of {}[{}]",
            request.percentage,
            session.identifier().short(),
            request.file_idx
        );
        return Ok(Json(json!({
            "message": "Seek percentage too close to end; ignoring",
            "ignored": true,
            "seekPositionBytes": seek_position,
            "percentage": request.percentage,
        }))
        .into_response());
    }

    let end = seek_position
        .saturating_add(PRIORITY_WINDOW_BYTES - 1)
        .min(last);
    let window = ByteRange::new(seek_position, end);
    session
        .handle()
        .prioritize(request.file_idx, window)
        .map_err(|e| match e {
            EngineError::FileNotFound { .. } => ApiError::bad_request("File index out of range"),
            other => {
                warn!("Prioritize failed for {}: {}", session.identifier(), other);
                ApiError::internal(other.to_string())
            }
        })?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "message": format!(
                "Prioritized bytes {}-{} for seek position at {:.2}%",
                window.start, window.end, request.percentage
            ),
            "seekPositionBytes": seek_position,
            "startByte": window.start,
            "endByte": window.end,
        })),
    )
        .into_response())
}
