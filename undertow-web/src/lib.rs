//! Undertow Web - HTTP surface for on-demand torrent media
//!
//! JSON endpoints for adding, inspecting and removing sessions, plus the
//! Stream Responder that serves range-addressable file bytes.

pub mod handlers;
pub mod server;
pub mod streaming;

pub use server::{AppState, build_router, run_server};
pub use streaming::{
    DownloadSnapshot, ProgressReport, ProgressTracker, StreamError, StreamResponder,
};
