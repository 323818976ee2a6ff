//! Integration tests for Undertow
//!
//! Drive the HTTP router end to end against the simulated engine: session
//! management, range streaming, download snapshots, progress polling and
//! shutdown.

#[path = "integration/harness.rs"]
mod harness;

#[path = "integration/http_api.rs"]
mod http_api;
#[path = "integration/range_streaming.rs"]
mod range_streaming;
#[path = "integration/download_snapshot.rs"]
mod download_snapshot;
#[path = "integration/playback.rs"]
mod playback;
#[path = "integration/session_lifecycle.rs"]
mod session_lifecycle;
