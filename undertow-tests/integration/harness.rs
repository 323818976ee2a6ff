//! Shared setup for router-level tests

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, header};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use undertow_core::config::{SessionConfig, SimulationConfig};
use undertow_core::{ContentId, SessionRegistry};
use undertow_sim::{ContentBehavior, SimulatedContent, SimulatedEngine, SimulatedFile};
use undertow_web::build_router;

pub const MOVIE_HASH: &str = "c9e15763f722f23e98a29decdfae341b98d53056";
pub const STALLED_HASH: &str = "1111111111111111111111111111111111111111";
pub const FAILING_HASH: &str = "2222222222222222222222222222222222222222";
pub const MANUAL_HASH: &str = "3333333333333333333333333333333333333333";

pub fn magnet(hash: &str) -> String {
    format!("magnet:?xt=urn:btih:{hash}&dn=test&tr=udp%3A%2F%2Ftracker.example%3A1337")
}

pub fn content_id(hash: &str) -> ContentId {
    ContentId::parse(hash).unwrap()
}

/// 1000 bytes with a position-dependent pattern.
pub fn movie_bytes() -> Vec<u8> {
    (0..1000u32).map(|i| (i % 251) as u8).collect()
}

pub fn extras_bytes() -> Vec<u8> {
    (0..300u32).map(|i| (i % 7) as u8).collect()
}

pub struct Harness {
    pub engine: Arc<SimulatedEngine>,
    pub registry: Arc<SessionRegistry>,
    pub router: Router,
    pub storage_dir: std::path::PathBuf,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(acquire_timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage_dir = dir.path().join("downloads");
        let engine = Arc::new(SimulatedEngine::new(SimulationConfig::instant()));

        engine.add_content(SimulatedContent::new(
            content_id(MOVIE_HASH),
            "Movie",
            vec![
                SimulatedFile::in_memory("Movie/movie.mp4", movie_bytes()),
                SimulatedFile::in_memory("Movie/extras.mkv", extras_bytes()),
                SimulatedFile::in_memory("Movie/notes.txt", &b"notes"[..]),
            ],
        ));
        engine.add_content(
            SimulatedContent::new(content_id(STALLED_HASH), "Stalled", Vec::new())
                .with_behavior(ContentBehavior::Stalled),
        );
        engine.add_content(
            SimulatedContent::new(content_id(FAILING_HASH), "Failing", Vec::new())
                .with_behavior(ContentBehavior::Fails("tracker unreachable".to_string())),
        );
        engine.add_content(
            SimulatedContent::new(
                content_id(MANUAL_HASH),
                "Manual",
                vec![SimulatedFile::in_memory("Manual/clip.mp4", movie_bytes())],
            )
            .with_behavior(ContentBehavior::Manual),
        );

        let config = SessionConfig {
            acquire_timeout,
            storage_dir: storage_dir.clone(),
        };
        let registry = Arc::new(SessionRegistry::new(engine.clone(), config).unwrap());
        let router = build_router(registry.clone());

        Self {
            engine,
            registry,
            router,
            storage_dir,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn add(&self, source: &str, file_idx: usize) -> Response<Body> {
        self.post_json("/add", json!({ "magnet": source, "fileIdx": file_idx }))
            .await
    }

    pub async fn get(&self, uri: &str, range: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(range) = range {
            builder = builder.header(header::RANGE, range);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
