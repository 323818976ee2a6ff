//! HTTP server for the Undertow API
//!
//! Builds the axum router over a shared session registry and runs it until
//! a shutdown signal arrives.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use undertow_core::SessionRegistry;
use undertow_core::config::ServerConfig;

use crate::handlers::{
    add_torrent, download_file, file_progress, health, prioritize, remove_torrent, stream_file,
    torrent_status,
};
use crate::streaming::{ProgressTracker, StreamResponder};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub responder: StreamResponder,
    pub progress: ProgressTracker,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            responder: StreamResponder::new(registry.clone()),
            progress: ProgressTracker::new(registry.clone()),
            registry,
        }
    }
}

/// Builds the application router.
pub fn build_router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/add", post(add_torrent))
        .route("/stream/{identifier}/{file_idx}", get(stream_file))
        .route("/download/{identifier}/{file_idx}", get(download_file))
        .route("/remove/{identifier}", delete(remove_torrent))
        .route("/status/{identifier}", get(torrent_status))
        .route("/progress/{identifier}/{file_idx}", get(file_progress))
        .route("/prioritize", post(prioritize))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(registry))
}

/// Serves the API until `shutdown` resolves.
///
/// Storage cleanup is left to the caller, which owns the registry.
///
/// # Errors
/// - `std::io::Error` - Failed to bind or serve on the configured address
pub async fn run_server<F>(
    config: &ServerConfig,
    registry: Arc<SessionRegistry>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(registry);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;

    info!(
        "Undertow media server running on http://{}",
        listener.local_addr()?
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
