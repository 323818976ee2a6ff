//! Per-file download progress with speed measured between polls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use undertow_core::{ContentId, SessionRegistry, SessionState};

/// How long a progress poll waits for metadata before answering.
pub const METADATA_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct Sample {
    completed: u64,
    taken_at: Instant,
}

/// Answers progress polls and remembers the previous sample per file.
#[derive(Clone)]
pub struct ProgressTracker {
    registry: Arc<SessionRegistry>,
    samples: Arc<Mutex<HashMap<(ContentId, usize), Sample>>>,
    metadata_wait: Duration,
}

impl ProgressTracker {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self::with_metadata_wait(registry, METADATA_WAIT)
    }

    pub fn with_metadata_wait(registry: Arc<SessionRegistry>, metadata_wait: Duration) -> Self {
        Self {
            registry,
            samples: Arc::new(Mutex::new(HashMap::new())),
            metadata_wait,
        }
    }

    /// Reports progress of one file.
    ///
    /// A session still fetching metadata is given a short grace period. Speed
    /// is zero on the first poll of a file and whenever no bytes arrived since
    /// the previous poll.
    pub async fn report(&self, identifier: &str, file_idx: usize) -> ProgressReport {
        let Ok(identifier) = ContentId::parse(identifier) else {
            return ProgressReport::InvalidIdentifier;
        };
        let Some(session) = self.registry.find(&identifier) else {
            return ProgressReport::TorrentNotFound;
        };

        let state = match session.state() {
            SessionState::Acquiring => session.settle_within(self.metadata_wait).await,
            state => state,
        };
        if state != SessionState::Ready {
            return ProgressReport::NotReady {
                status: state.label(),
            };
        }

        let Some(file) = session.file(file_idx) else {
            return ProgressReport::FileOutOfRange;
        };

        let completed = file.downloaded.min(file.length);
        let percent = if file.length == 0 {
            100.0
        } else {
            completed as f64 / file.length as f64 * 100.0
        };
        let speed = self.record(session.identifier().clone(), file_idx, completed);

        ProgressReport::Progress(FileProgress {
            ready: completed > 0 || file.length == 0,
            file_path: file.relative_path.to_string_lossy().into_owned(),
            completed_bytes: completed,
            length_bytes: file.length,
            percent,
            download_speed_bytes_per_sec: speed,
        })
    }

    /// Drops stored samples for a removed session.
    pub fn forget(&self, identifier: &ContentId) {
        self.samples.lock().retain(|(id, _), _| id != identifier);
    }

    fn record(&self, identifier: ContentId, file_idx: usize, completed: u64) -> u64 {
        let now = Instant::now();
        let previous = self.samples.lock().insert(
            (identifier, file_idx),
            Sample {
                completed,
                taken_at: now,
            },
        );

        let Some(previous) = previous else {
            return 0;
        };
        let elapsed = now.duration_since(previous.taken_at).as_secs_f64();
        let gained = completed.saturating_sub(previous.completed);
        if elapsed <= 0.0 || gained == 0 {
            return 0;
        }
        (gained as f64 / elapsed) as u64
    }
}

/// Outcome of a progress poll.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressReport {
    InvalidIdentifier,
    TorrentNotFound,
    /// Metadata did not arrive within the grace period, or the transfer failed
    NotReady { status: &'static str },
    FileOutOfRange,
    Progress(FileProgress),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileProgress {
    pub ready: bool,
    pub file_path: String,
    pub completed_bytes: u64,
    pub length_bytes: u64,
    pub percent: f64,
    pub download_speed_bytes_per_sec: u64,
}

impl IntoResponse for ProgressReport {
    fn into_response(self) -> Response {
        match self {
            ProgressReport::InvalidIdentifier => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid identifier" })),
            )
                .into_response(),
            ProgressReport::TorrentNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Torrent not found" })),
            )
                .into_response(),
            ProgressReport::NotReady { status } => (
                StatusCode::OK,
                Json(json!({ "ready": false, "status": status })),
            )
                .into_response(),
            ProgressReport::FileOutOfRange => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "File index out of range" })),
            )
                .into_response(),
            ProgressReport::Progress(progress) => (StatusCode::OK, Json(progress)).into_response(),
        }
    }
}
