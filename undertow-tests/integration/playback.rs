//! Progress polling and seek prioritization

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use undertow_core::ByteRange;

use crate::harness::{Harness, MOVIE_HASH, STALLED_HASH, body_json, content_id, magnet};

async fn ready_harness() -> Harness {
    let harness = Harness::new();
    let response = harness.add(&magnet(MOVIE_HASH), 0).await;
    assert_eq!(response.status(), StatusCode::OK);
    harness
}

#[tokio::test(start_paused = true)]
async fn test_progress_reports_speed_between_polls() {
    let harness = ready_harness().await;
    let transfer = harness.engine.transfer(&content_id(MOVIE_HASH)).unwrap();
    let uri = format!("/progress/{MOVIE_HASH}/0");
    transfer.set_downloaded(0, 200);

    let first = body_json(harness.get(&uri, None).await).await;
    assert_eq!(first["ready"], true);
    assert_eq!(first["filePath"], "Movie/movie.mp4");
    assert_eq!(first["completedBytes"], 200);
    assert_eq!(first["lengthBytes"], 1000);
    assert_eq!(first["percent"], 20.0);
    assert_eq!(first["downloadSpeedBytesPerSec"], 0);

    tokio::time::sleep(Duration::from_secs(4)).await;
    transfer.set_downloaded(0, 1000);

    let second = body_json(harness.get(&uri, None).await).await;
    assert_eq!(second["downloadSpeedBytesPerSec"], 200);
    assert_eq!(second["percent"], 100.0);
}

#[tokio::test]
async fn test_progress_speed_is_tracked_per_file() {
    let harness = ready_harness().await;

    harness.get(&format!("/progress/{MOVIE_HASH}/0"), None).await;
    let other = body_json(harness.get(&format!("/progress/{MOVIE_HASH}/1"), None).await).await;

    assert_eq!(other["downloadSpeedBytesPerSec"], 0);
    assert_eq!(other["lengthBytes"], 300);
}

#[tokio::test]
async fn test_progress_rejections() {
    let harness = ready_harness().await;

    let bad_index = harness
        .get(&format!("/progress/{MOVIE_HASH}/first"), None)
        .await;
    assert_eq!(bad_index.status(), StatusCode::BAD_REQUEST);

    let out_of_range = harness.get(&format!("/progress/{MOVIE_HASH}/9"), None).await;
    assert_eq!(out_of_range.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(out_of_range).await["error"],
        "File index out of range"
    );

    let unknown = harness
        .get(&format!("/progress/{}/0", "a".repeat(40)), None)
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    harness.delete(&format!("/remove/{MOVIE_HASH}")).await;
    let removed = harness.get(&format!("/progress/{MOVIE_HASH}/0"), None).await;
    assert_eq!(removed.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_progress_of_pending_session() {
    let harness = Harness::new();
    harness.engine.preload(&content_id(STALLED_HASH)).unwrap();

    let response = harness.get(&format!("/progress/{STALLED_HASH}/0"), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "ready": false, "status": "getting metadata" })
    );
}

#[tokio::test]
async fn test_prioritize_seek_window() {
    let harness = ready_harness().await;

    let response = harness
        .post_json(
            "/prioritize",
            json!({ "infoHash": MOVIE_HASH, "fileIdx": 0, "percentage": 50.0 }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["seekPositionBytes"], 500);
    assert_eq!(body["startByte"], 500);
    assert_eq!(body["endByte"], 999);

    let transfer = harness.engine.transfer(&content_id(MOVIE_HASH)).unwrap();
    assert_eq!(
        transfer.priority_requests(),
        vec![(0, ByteRange::new(500, 999))]
    );
}

#[tokio::test]
async fn test_prioritize_near_end_is_ignored() {
    let harness = ready_harness().await;

    let response = harness
        .post_json(
            "/prioritize",
            json!({ "identifier": MOVIE_HASH, "fileIdx": 0, "percentage": 99.9 }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ignored"], true);
    let transfer = harness.engine.transfer(&content_id(MOVIE_HASH)).unwrap();
    assert!(transfer.priority_requests().is_empty());
}

#[tokio::test]
async fn test_prioritize_rejections() {
    let harness = ready_harness().await;

    let cases = [
        (json!({ "fileIdx": 0, "percentage": 10.0 }), StatusCode::BAD_REQUEST),
        (
            json!({ "identifier": MOVIE_HASH, "fileIdx": 0, "percentage": 120.0 }),
            StatusCode::BAD_REQUEST,
        ),
        (
            json!({ "identifier": MOVIE_HASH, "fileIdx": 9, "percentage": 10.0 }),
            StatusCode::BAD_REQUEST,
        ),
        (
            json!({ "identifier": "a".repeat(40), "fileIdx": 0, "percentage": 10.0 }),
            StatusCode::NOT_FOUND,
        ),
    ];

    for (body, expected) in cases {
        let response = harness.post_json("/prioritize", body.clone()).await;
        assert_eq!(response.status(), expected, "{body}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_prioritize_waits_for_metadata() {
    let harness = Harness::new();
    harness.engine.preload(&content_id(STALLED_HASH)).unwrap();

    let response = harness
        .post_json(
            "/prioritize",
            json!({ "identifier": STALLED_HASH, "fileIdx": 0, "percentage": 10.0 }),
        )
        .await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
