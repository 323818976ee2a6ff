//! Download snapshot endpoint

use axum::http::StatusCode;
use serde_json::json;

use crate::harness::{Harness, MOVIE_HASH, body_json, content_id, magnet};

#[tokio::test]
async fn test_snapshot_before_any_bytes() {
    let harness = Harness::new();
    harness.add(&magnet(MOVIE_HASH), 0).await;
    let transfer = harness.engine.transfer(&content_id(MOVIE_HASH)).unwrap();
    transfer.set_downloaded(0, 0);

    let response = harness.get(&format!("/download/{MOVIE_HASH}/0"), None).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        body_json(response).await,
        json!({ "success": false, "downloading": true, "progress": 0 })
    );
}

#[tokio::test]
async fn test_snapshot_of_partial_file() {
    let harness = Harness::new();
    harness.add(&magnet(MOVIE_HASH), 0).await;
    let transfer = harness.engine.transfer(&content_id(MOVIE_HASH)).unwrap();
    transfer.set_downloaded(0, 400);

    let response = harness.get(&format!("/download/{MOVIE_HASH}/0"), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["downloaded"], 400);
    assert_eq!(body["total"], 1000);
    assert_eq!(body["progress"], 40.0);
    assert_eq!(body["isComplete"], false);
}

#[tokio::test]
async fn test_snapshot_of_complete_file() {
    let harness = Harness::new();
    harness.add(&magnet(MOVIE_HASH), 0).await;

    let response = harness.get(&format!("/download/{MOVIE_HASH}/1"), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["isComplete"], true);
    assert_eq!(body["progress"], 100.0);
    assert_eq!(body["hash"], MOVIE_HASH);
    assert_eq!(body["segment"], 1);
    let expected = harness.storage_dir.join("Movie/extras.mkv");
    assert_eq!(body["localPath"], expected.to_str().unwrap());
}

#[tokio::test]
async fn test_snapshot_not_found() {
    let harness = Harness::new();
    harness.add(&magnet(MOVIE_HASH), 0).await;

    let unknown = harness
        .get(&format!("/download/{}/0", "b".repeat(40)), None)
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(unknown).await,
        json!({ "success": false, "error": "Torrent not found" })
    );

    let missing_file = harness.get(&format!("/download/{MOVIE_HASH}/5"), None).await;
    assert_eq!(missing_file.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(missing_file).await,
        json!({ "success": false, "error": "File not found in torrent" })
    );
}
