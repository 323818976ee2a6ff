//! Timeouts, background completion, library content and shutdown

use std::time::Duration;

use axum::http::{StatusCode, header};
use undertow_core::config::{SessionConfig, SimulationConfig};
use undertow_core::{SessionRegistry, TransferHandle};
use undertow_sim::{SimulatedEngine, scan_library};

use crate::harness::{Harness, MANUAL_HASH, MOVIE_HASH, body_bytes, content_id, magnet};

#[tokio::test(start_paused = true)]
async fn test_transfer_survives_caller_timeout() {
    let harness = Harness::with_timeout(Duration::from_secs(30));

    let first = harness.add(&magnet(MANUAL_HASH), 0).await;
    assert_eq!(first.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(harness.registry.len(), 1);

    harness
        .engine
        .transfer(&content_id(MANUAL_HASH))
        .unwrap()
        .set_ready();

    let second = harness.add(&magnet(MANUAL_HASH), 0).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(harness.engine.counters().acquires(), 1);
}

#[tokio::test]
async fn test_failed_transfer_is_restarted_on_next_add() {
    let harness = Harness::with_timeout(Duration::from_secs(5));
    let id = content_id(MANUAL_HASH);

    let pending = {
        let source = magnet(MANUAL_HASH);
        let add = harness.add(&source, 0);
        let fail = async {
            loop {
                if let Some(transfer) = harness.engine.transfer(&id) {
                    transfer.fail("no peers");
                    break;
                }
                tokio::task::yield_now().await;
            }
        };
        let (response, ()) = tokio::join!(add, fail);
        response
    };
    assert_eq!(pending.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(harness.registry.is_empty());

    let retry = {
        let source = magnet(MANUAL_HASH);
        let add = harness.add(&source, 0);
        let ready = async {
            loop {
                if let Some(transfer) = harness.engine.transfer(&id)
                    && transfer.readiness().borrow().is_pending()
                {
                    transfer.set_ready();
                    break;
                }
                tokio::task::yield_now().await;
            }
        };
        let (response, ()) = tokio::join!(add, ready);
        response
    };
    assert_eq!(retry.status(), StatusCode::OK);
    assert_eq!(harness.engine.counters().acquires(), 2);
}

#[tokio::test]
async fn test_shutdown_purges_storage_and_stops_engine() {
    let harness = Harness::new();
    harness.add(&magnet(MOVIE_HASH), 0).await;
    std::fs::create_dir_all(harness.storage_dir.join("Movie")).unwrap();
    std::fs::write(harness.storage_dir.join("Movie/movie.mp4"), b"partial").unwrap();

    harness.registry.shutdown_all();
    harness.registry.shutdown_all();

    assert!(!harness.storage_dir.exists());
    assert!(harness.registry.is_empty());
    assert!(harness.registry.is_shut_down());

    let response = harness.add(&magnet(MOVIE_HASH), 0).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_library_file_streams_from_disk() {
    let media = tempfile::tempdir().unwrap();
    let contents: Vec<u8> = (0..5000u32).map(|i| (i % 13) as u8).collect();
    std::fs::write(media.path().join("Night_of.the.Test.mkv"), &contents).unwrap();

    let engine = std::sync::Arc::new(SimulatedEngine::new(SimulationConfig::instant()));
    let catalog = scan_library(media.path()).await.unwrap();
    assert_eq!(catalog.len(), 1);
    let id = catalog[0].identifier.clone();
    for content in catalog {
        engine.add_content(content);
    }

    let storage = tempfile::tempdir().unwrap();
    let config = SessionConfig {
        acquire_timeout: Duration::from_secs(5),
        storage_dir: storage.path().join("downloads"),
    };
    let registry = std::sync::Arc::new(SessionRegistry::new(engine.clone(), config).unwrap());
    let acquisition = registry.acquire_or_reuse(id.as_str(), 0).await.unwrap();
    assert_eq!(acquisition.identifier, id);

    let router = undertow_web::build_router(registry);
    let request = axum::http::Request::builder()
        .uri(format!("/stream/{id}/0"))
        .header(header::RANGE, "bytes=4000-4999")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(router, request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/x-matroska");
    assert_eq!(&body_bytes(response).await[..], &contents[4000..]);
    assert_eq!(engine.counters().streams_released(), 1);
}
