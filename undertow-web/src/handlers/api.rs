//! JSON handlers for session management

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use undertow_core::{Acquisition, ContentId, FileRef, SessionState};

use super::ApiError;
use crate::server::AppState;

/// Body of `POST /add`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRequest {
    pub magnet: Option<String>,
    pub file_idx: Option<Value>,
}

impl AddRequest {
    /// Validates the body, returning the magnet and file index.
    fn validate(self) -> Result<(String, usize), ApiError> {
        let magnet = self
            .magnet
            .filter(|magnet| !magnet.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("Missing magnet URI"))?;

        let file_idx = match self.file_idx {
            None | Some(Value::Null) => return Err(ApiError::bad_request("Missing fileIdx")),
            Some(value) => value
                .as_u64()
                .and_then(|idx| usize::try_from(idx).ok())
                .ok_or_else(|| {
                    ApiError::bad_request("fileIdx must be a non-negative integer")
                })?,
        };

        Ok((magnet, file_idx))
    }
}

/// `POST /add`: acquires content and waits for its metadata.
pub async fn add_torrent(
    State(state): State<AppState>,
    body: Result<Json<AddRequest>, JsonRejection>,
) -> Result<Json<Acquisition>, ApiError> {
    let Json(request) = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let (magnet, file_idx) = request.validate()?;

    let acquisition = state.registry.acquire_or_reuse(&magnet, file_idx).await?;
    info!(
        "Session {} ready (file {})",
        acquisition.identifier, acquisition.file_idx
    );
    Ok(Json(acquisition))
}

/// `DELETE /remove/{identifier}`
pub async fn remove_torrent(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.destroy(&identifier).await?;
    if let Ok(identifier) = ContentId::parse(&identifier) {
        state.progress.forget(&identifier);
    }
    Ok(Json(json!({ "removed": true })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusFile {
    pub index: usize,
    pub path: String,
    pub length: u64,
    pub downloaded: u64,
}

impl From<&FileRef> for StatusFile {
    fn from(file: &FileRef) -> Self {
        Self {
            index: file.index,
            path: file.relative_path.to_string_lossy().into_owned(),
            length: file.length,
            downloaded: file.downloaded,
        }
    }
}

/// Body of `GET /status/{identifier}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub identifier: ContentId,
    pub state: &'static str,
    pub name: Option<String>,
    pub files: Vec<StatusFile>,
    pub bytes_completed: u64,
    pub total_length: u64,
    pub percent_completed: f64,
}

/// `GET /status/{identifier}`: session progress in any lifecycle state.
pub async fn torrent_status(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let identifier = ContentId::parse(&identifier)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let session = state
        .registry
        .find(&identifier)
        .ok_or_else(|| ApiError::not_found("Torrent not found"))?;

    let files = session.files();
    let bytes_completed: u64 = files.iter().map(|f| f.downloaded.min(f.length)).sum();
    let total_length: u64 = files.iter().map(|f| f.length).sum();
    let percent_completed = if total_length == 0 {
        0.0
    } else {
        bytes_completed as f64 / total_length as f64 * 100.0
    };

    let label = match session.state() {
        SessionState::Ready if total_length > 0 && bytes_completed == total_length => "completed",
        SessionState::Ready => "downloading",
        other => other.label(),
    };

    Ok(Json(StatusResponse {
        identifier: session.identifier().clone(),
        state: label,
        name: session.name(),
        files: files.iter().map(StatusFile::from).collect(),
        bytes_completed,
        total_length,
        percent_completed,
    }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "sessions": state.registry.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(magnet: Option<&str>, file_idx: Option<Value>) -> AddRequest {
        AddRequest {
            magnet: magnet.map(str::to_string),
            file_idx,
        }
    }

    #[test]
    fn test_valid_request() {
        let (magnet, idx) = request(Some("magnet:?xt=urn:btih:abc"), Some(json!(2)))
            .validate()
            .unwrap();
        assert_eq!(magnet, "magnet:?xt=urn:btih:abc");
        assert_eq!(idx, 2);
    }

    #[test]
    fn test_invalid_requests() {
        let cases = [
            request(None, Some(json!(0))),
            request(Some("  "), Some(json!(0))),
            request(Some("m"), None),
            request(Some("m"), Some(Value::Null)),
            request(Some("m"), Some(json!(-1))),
            request(Some("m"), Some(json!(1.5))),
            request(Some("m"), Some(json!("0"))),
        ];
        for case in cases {
            let err = case.validate().unwrap_err();
            assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        }
    }
}
