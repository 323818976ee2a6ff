//! Stream Responder: range-addressed file streaming and download snapshots.

pub mod body;
pub mod progress;
pub mod range;
pub mod responder;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};
use undertow_core::{ContentId, EngineError};

pub use body::{ReleasingBody, is_benign_stream_error};
pub use progress::{FileProgress, ProgressReport, ProgressTracker};
pub use range::{extract_range_header, parse_range_header};
pub use responder::{DownloadSnapshot, SnapshotDetails, StreamResponder};

/// Errors returned while preparing a file stream response.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Torrent not found")]
    TorrentNotFound { identifier: String },

    #[error("File not found in torrent")]
    FileNotFound { identifier: ContentId, index: usize },

    #[error("Requested range not satisfiable")]
    RangeNotSatisfiable { total: u64 },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Stream failed before first byte: {0}")]
    Read(#[source] std::io::Error),
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        match &self {
            StreamError::TorrentNotFound { identifier } => {
                debug!("No ready session for {}", identifier);
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
            StreamError::FileNotFound { identifier, index } => {
                debug!("File {} missing from {}", index, identifier);
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
            StreamError::RangeNotSatisfiable { total } => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [(header::CONTENT_RANGE, format!("bytes */{total}"))],
                self.to_string(),
            )
                .into_response(),
            StreamError::Engine(EngineError::FileNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "File not found in torrent").into_response()
            }
            StreamError::Engine(_) | StreamError::Read(_) => {
                error!("Stream setup failed: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

/// Content type for a file name, decided by its extension alone.
pub fn content_type_for(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".mp4") {
        "video/mp4"
    } else if lower.ends_with(".mkv") {
        "video/x-matroska"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_lookup() {
        assert_eq!(content_type_for("movie.mp4"), "video/mp4");
        assert_eq!(content_type_for("MOVIE.MKV"), "video/x-matroska");
        assert_eq!(content_type_for("movie.avi"), "application/octet-stream");
        assert_eq!(content_type_for("mp4"), "application/octet-stream");
    }

    #[test]
    fn test_unsatisfiable_response_carries_total() {
        let response = StreamError::RangeNotSatisfiable { total: 1000 }.into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    }
}
