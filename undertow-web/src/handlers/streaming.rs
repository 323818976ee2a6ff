//! Byte streaming and download snapshot handlers

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use super::parse_file_index;
use crate::server::AppState;
use crate::streaming::extract_range_header;

/// `GET /stream/{identifier}/{file_idx}`
pub async fn stream_file(
    State(state): State<AppState>,
    Path((identifier, file_idx)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let Some(file_idx) = parse_file_index(&file_idx) else {
        return (StatusCode::BAD_REQUEST, "Invalid file index").into_response();
    };

    state
        .responder
        .stream_file(&identifier, file_idx, extract_range_header(&headers))
        .await
        .into_response()
}

/// `GET /download/{identifier}/{file_idx}`
pub async fn download_file(
    State(state): State<AppState>,
    Path((identifier, file_idx)): Path<(String, String)>,
) -> Response {
    let Some(file_idx) = parse_file_index(&file_idx) else {
        return (StatusCode::BAD_REQUEST, "Invalid file index").into_response();
    };

    state
        .responder
        .download_snapshot(&identifier, file_idx)
        .into_response()
}
