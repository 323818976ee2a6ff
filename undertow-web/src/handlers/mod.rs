//! HTTP request handlers organized by functionality

pub mod api;
pub mod playback;
pub mod streaming;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};
use undertow_core::SessionError;

pub use api::{AddRequest, add_torrent, health, remove_torrent, torrent_status};
pub use playback::{PrioritizeRequest, file_progress, prioritize};
pub use streaming::{download_file, stream_file};

/// JSON `{error}` response used by the management endpoints.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        if err.is_user_error() {
            warn!("Rejected request: {}", err);
            return Self::bad_request(err.to_string());
        }
        error!("Session operation failed: {}", err);
        Self::internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// Parses a file index path segment.
pub(crate) fn parse_file_index(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok()
}
