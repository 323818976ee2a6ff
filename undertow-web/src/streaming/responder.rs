//! Stream responder bound to a session registry.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use undertow_core::{ContentId, SessionRegistry};

use super::body::ReleasingBody;
use super::range::parse_range_header;
use super::{StreamError, content_type_for};

/// Serves file bytes and progress snapshots for ready sessions.
#[derive(Clone)]
pub struct StreamResponder {
    registry: Arc<SessionRegistry>,
}

impl StreamResponder {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Streams a file, honoring an optional Range header.
    ///
    /// Responds 206 for a satisfiable range and 200 for the whole file. The
    /// engine stream is opened only after every check has passed.
    ///
    /// # Errors
    /// - `StreamError::TorrentNotFound` - No ready session for `identifier`
    /// - `StreamError::FileNotFound` - `file_idx` outside the content set
    /// - `StreamError::RangeNotSatisfiable` - Range malformed or outside the file
    /// - `StreamError::Engine` - Engine refused to open the stream
    /// - `StreamError::Read` - Stream failed before producing any bytes
    pub async fn stream_file(
        &self,
        identifier: &str,
        file_idx: usize,
        range_header: Option<&str>,
    ) -> Result<Response, StreamError> {
        let session =
            self.registry
                .lookup(identifier)
                .ok_or_else(|| StreamError::TorrentNotFound {
                    identifier: identifier.to_string(),
                })?;
        let file = session
            .file(file_idx)
            .ok_or_else(|| StreamError::FileNotFound {
                identifier: session.identifier().clone(),
                index: file_idx,
            })?;

        let total = file.length;
        let content_type = content_type_for(file.name());
        let range = match range_header {
            Some(header) => Some(
                parse_range_header(header, total)
                    .ok_or(StreamError::RangeNotSatisfiable { total })?,
            ),
            None => None,
        };

        let stream = session.handle().open_stream(file_idx, range)?;
        let label = format!("{}[{}]", session.identifier().short(), file_idx);
        let body = ReleasingBody::prime(stream, label)
            .await
            .map_err(StreamError::Read)?;

        let builder = Response::builder().header(header::CONTENT_TYPE, content_type);
        let builder = match range {
            Some(range) => {
                debug!(
                    "Serving {}[{}] bytes {}-{}/{}",
                    session.identifier().short(),
                    file_idx,
                    range.start,
                    range.end,
                    total
                );
                builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(
                        header::CONTENT_RANGE,
                        format!("bytes {}-{}/{}", range.start, range.end, total),
                    )
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CONTENT_LENGTH, range.len().to_string())
            }
            None => builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, total.to_string()),
        };

        Ok(builder
            .body(Body::from_stream(body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
    }

    /// Reports where a file lives on disk and how much of it has arrived.
    pub fn download_snapshot(&self, identifier: &str, file_idx: usize) -> DownloadSnapshot {
        let Some(session) = self.registry.lookup(identifier) else {
            return DownloadSnapshot::TorrentNotFound;
        };
        let Some(file) = session.file(file_idx) else {
            return DownloadSnapshot::FileNotFound;
        };

        if file.downloaded == 0 {
            return DownloadSnapshot::Starting;
        }

        let downloaded = file.downloaded.min(file.length);
        DownloadSnapshot::Available(SnapshotDetails {
            local_path: session.local_path(&file),
            hash: session.identifier().clone(),
            segment: file_idx,
            downloaded,
            total: file.length,
            progress: downloaded as f64 / file.length as f64 * 100.0,
            is_complete: downloaded == file.length,
        })
    }
}

/// Outcome of a download snapshot request.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadSnapshot {
    TorrentNotFound,
    FileNotFound,
    /// No bytes of the file have arrived yet
    Starting,
    Available(SnapshotDetails),
}

/// Progress and location of a partially or fully downloaded file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDetails {
    pub local_path: PathBuf,
    pub hash: ContentId,
    pub segment: usize,
    pub downloaded: u64,
    pub total: u64,
    pub progress: f64,
    pub is_complete: bool,
}

impl IntoResponse for DownloadSnapshot {
    fn into_response(self) -> Response {
        match self {
            DownloadSnapshot::TorrentNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "success": false, "error": "Torrent not found" })),
            )
                .into_response(),
            DownloadSnapshot::FileNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "success": false, "error": "File not found in torrent" })),
            )
                .into_response(),
            DownloadSnapshot::Starting => (
                StatusCode::ACCEPTED,
                Json(json!({ "success": false, "downloading": true, "progress": 0 })),
            )
                .into_response(),
            DownloadSnapshot::Available(details) => {
                let mut body = json!({ "success": true });
                if let (Some(object), Ok(serde_json::Value::Object(fields))) =
                    (body.as_object_mut(), serde_json::to_value(&details))
                {
                    object.extend(fields);
                }
                (StatusCode::OK, Json(body)).into_response()
            }
        }
    }
}
