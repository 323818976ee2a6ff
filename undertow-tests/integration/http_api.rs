//! Session management endpoints

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::json;

use crate::harness::{
    FAILING_HASH, Harness, MANUAL_HASH, MOVIE_HASH, STALLED_HASH, body_json, content_id, magnet,
};

#[tokio::test]
async fn test_add_returns_canonical_identifier() {
    let harness = Harness::new();

    let response = harness.add(&magnet(&MOVIE_HASH.to_uppercase()), 1).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["identifier"], MOVIE_HASH);
    assert_eq!(body["fileIdx"], 1);
}

#[tokio::test]
async fn test_repeated_add_reuses_transfer() {
    let harness = Harness::new();

    assert_eq!(harness.add(&magnet(MOVIE_HASH), 0).await.status(), StatusCode::OK);
    assert_eq!(harness.add(MOVIE_HASH, 1).await.status(), StatusCode::OK);

    assert_eq!(harness.engine.counters().acquires(), 1);
    assert_eq!(harness.registry.len(), 1);
}

#[tokio::test]
async fn test_add_rejects_bad_bodies() {
    let harness = Harness::new();

    let cases = [
        json!({ "fileIdx": 0 }),
        json!({ "magnet": "", "fileIdx": 0 }),
        json!({ "magnet": magnet(MOVIE_HASH) }),
        json!({ "magnet": magnet(MOVIE_HASH), "fileIdx": -1 }),
        json!({ "magnet": magnet(MOVIE_HASH), "fileIdx": "first" }),
        json!({ "magnet": "magnet:?xt=urn:btih:nothex", "fileIdx": 0 }),
        json!({ "magnet": "not a hash", "fileIdx": 0 }),
    ];

    for case in cases {
        let response = harness.post_json("/add", case.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{case}");
        let body = body_json(response).await;
        assert!(body["error"].is_string(), "{case}");
    }

    assert_eq!(harness.engine.counters().acquires(), 0);
}

#[tokio::test]
async fn test_add_rejects_unparseable_json() {
    let harness = Harness::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/add")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = harness.send(request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test(start_paused = true)]
async fn test_add_times_out_without_metadata() {
    let harness = Harness::new();

    let response = harness.add(&magnet(STALLED_HASH), 0).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("timeout"));
}

#[tokio::test]
async fn test_add_reports_engine_failure() {
    let harness = Harness::new();

    let response = harness.add(&magnet(FAILING_HASH), 0).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("tracker unreachable"));
    assert!(harness.registry.is_empty());
}

#[tokio::test]
async fn test_concurrent_adds_share_one_acquisition() {
    let harness = Harness::with_timeout(Duration::from_secs(10));
    let id = content_id(MANUAL_HASH);

    let requests: Vec<_> = (0..5)
        .map(|idx| {
            let router = harness.router.clone();
            let body = json!({ "magnet": magnet(MANUAL_HASH), "fileIdx": idx });
            tokio::spawn(async move {
                use tower::ServiceExt;
                let request = Request::builder()
                    .method(Method::POST)
                    .uri("/add")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap();
                router.oneshot(request).await.unwrap()
            })
        })
        .collect();

    let transfer = loop {
        if let Some(transfer) = harness.engine.transfer(&id) {
            break transfer;
        }
        tokio::task::yield_now().await;
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    transfer.set_ready();

    for request in requests {
        let response = request.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["identifier"], MANUAL_HASH);
    }
    assert_eq!(harness.engine.counters().acquires(), 1);
}

#[tokio::test]
async fn test_remove_unknown_is_noop() {
    let harness = Harness::new();

    let response = harness.delete(&format!("/remove/{MOVIE_HASH}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "removed": true }));
    assert_eq!(harness.engine.counters().destroys(), 0);
}

#[tokio::test]
async fn test_remove_tears_down_session() {
    let harness = Harness::new();
    harness.add(&magnet(MOVIE_HASH), 0).await;

    let response = harness.delete(&format!("/remove/{MOVIE_HASH}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.registry.is_empty());
    assert_eq!(harness.engine.counters().destroys(), 1);
    let status = harness.get(&format!("/status/{MOVIE_HASH}"), None).await;
    assert_eq!(status.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_remove_keeps_session() {
    let harness = Harness::new();
    harness.add(&magnet(MOVIE_HASH), 0).await;
    harness.engine.set_fail_destroy(true);

    let response = harness.delete(&format!("/remove/{MOVIE_HASH}")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(response).await["error"].is_string());
    assert_eq!(harness.registry.len(), 1);

    harness.engine.set_fail_destroy(false);
    let retry = harness.delete(&format!("/remove/{MOVIE_HASH}")).await;
    assert_eq!(retry.status(), StatusCode::OK);
    assert!(harness.registry.is_empty());
}

#[tokio::test]
async fn test_remove_rejects_malformed_identifier() {
    let harness = Harness::new();

    let response = harness.delete("/remove/xyz").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_reports_progress() {
    let harness = Harness::new();
    harness.add(&magnet(MOVIE_HASH), 0).await;

    let body = body_json(harness.get(&format!("/status/{MOVIE_HASH}"), None).await).await;
    assert_eq!(body["state"], "completed");
    assert_eq!(body["name"], "Movie");
    assert_eq!(body["files"].as_array().unwrap().len(), 3);
    assert_eq!(body["totalLength"], 1305);
    assert_eq!(body["percentCompleted"], 100.0);

    let transfer = harness.engine.transfer(&content_id(MOVIE_HASH)).unwrap();
    transfer.set_downloaded(0, 0);
    let body = body_json(harness.get(&format!("/status/{MOVIE_HASH}"), None).await).await;
    assert_eq!(body["state"], "downloading");
    assert_eq!(body["bytesCompleted"], 305);
    assert_eq!(body["files"][0]["path"], "Movie/movie.mp4");
    assert_eq!(body["files"][0]["downloaded"], 0);
}

#[tokio::test]
async fn test_status_of_pending_and_unknown_sessions() {
    let harness = Harness::new();
    harness.engine.preload(&content_id(STALLED_HASH)).unwrap();

    let pending = body_json(harness.get(&format!("/status/{STALLED_HASH}"), None).await).await;
    assert_eq!(pending["state"], "getting metadata");
    assert_eq!(pending["files"], json!([]));

    let unknown = harness.get(&format!("/status/{MOVIE_HASH}"), None).await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let malformed = harness.get("/status/xyz", None).await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::new();
    harness.add(&magnet(MOVIE_HASH), 0).await;

    let body = body_json(harness.get("/health", None).await).await;

    assert_eq!(body, json!({ "status": "ok", "sessions": 1 }));
}
