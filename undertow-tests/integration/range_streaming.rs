//! Range-addressed streaming through the HTTP surface

use std::io;
use std::time::Duration;

use axum::http::{StatusCode, header};
use http_body_util::BodyExt;
use undertow_core::ContentId;
use undertow_sim::{SimulatedContent, SimulatedFile};

use crate::harness::{
    Harness, MOVIE_HASH, STALLED_HASH, body_bytes, content_id, extras_bytes, magnet, movie_bytes,
};

async fn ready_harness() -> Harness {
    let harness = Harness::new();
    let response = harness.add(&magnet(MOVIE_HASH), 0).await;
    assert_eq!(response.status(), StatusCode::OK);
    harness
}

#[tokio::test]
async fn test_range_request_returns_partial_content() {
    let harness = ready_harness().await;

    let response = harness
        .get(&format!("/stream/{MOVIE_HASH}/0"), Some("bytes=0-99"))
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-99/1000");
    assert_eq!(headers[header::CONTENT_LENGTH], "100");
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(&body_bytes(response).await[..], &movie_bytes()[..100]);
}

#[tokio::test]
async fn test_range_past_end_is_rejected_without_opening_stream() {
    let harness = ready_harness().await;

    let response = harness
        .get(&format!("/stream/{MOVIE_HASH}/0"), Some("bytes=900-1999"))
        .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    assert_eq!(harness.engine.counters().streams_opened(), 0);
}

#[tokio::test]
async fn test_full_file_without_range() {
    let harness = ready_harness().await;

    let response = harness.get(&format!("/stream/{MOVIE_HASH}/0"), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
    assert!(response.headers().get(header::CONTENT_RANGE).is_none());
    assert_eq!(&body_bytes(response).await[..], movie_bytes().as_slice());
    assert_eq!(harness.engine.counters().streams_released(), 1);
}

#[tokio::test]
async fn test_open_ended_and_suffix_ranges() {
    let harness = ready_harness().await;
    let uri = format!("/stream/{MOVIE_HASH}/1");

    let open_ended = harness.get(&uri, Some("bytes=250-")).await;
    assert_eq!(open_ended.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(open_ended.headers()[header::CONTENT_RANGE], "bytes 250-299/300");
    assert_eq!(open_ended.headers()[header::CONTENT_TYPE], "video/x-matroska");
    assert_eq!(&body_bytes(open_ended).await[..], &extras_bytes()[250..]);

    let suffix = harness.get(&uri, Some("bytes=-10")).await;
    assert_eq!(suffix.headers()[header::CONTENT_RANGE], "bytes 290-299/300");
    assert_eq!(&body_bytes(suffix).await[..], &extras_bytes()[290..]);
}

#[tokio::test]
async fn test_unknown_extension_is_octet_stream() {
    let harness = ready_harness().await;

    let response = harness.get(&format!("/stream/{MOVIE_HASH}/2"), None).await;

    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    assert_eq!(&body_bytes(response).await[..], b"notes");
}

#[tokio::test]
async fn test_missing_torrent_and_file() {
    let harness = ready_harness().await;

    let unknown = harness
        .get(&format!("/stream/{}/0", "a".repeat(40)), None)
        .await;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(&body_bytes(unknown).await[..], b"Torrent not found");

    let missing_file = harness.get(&format!("/stream/{MOVIE_HASH}/9"), None).await;
    assert_eq!(missing_file.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        &body_bytes(missing_file).await[..],
        b"File not found in torrent"
    );

    let bad_index = harness
        .get(&format!("/stream/{MOVIE_HASH}/first"), None)
        .await;
    assert_eq!(bad_index.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_pending_session_is_not_streamable() {
    let harness = Harness::new();
    harness.engine.preload(&content_id(STALLED_HASH)).unwrap();

    let response = harness.get(&format!("/stream/{STALLED_HASH}/0"), None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_client_disconnect_releases_stream_once() {
    let harness = ready_harness().await;

    let response = harness.get(&format!("/stream/{MOVIE_HASH}/0"), None).await;
    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap();
    assert!(first.is_data());
    assert_eq!(harness.engine.counters().streams_released(), 0);

    drop(body);

    assert_eq!(harness.engine.counters().streams_opened(), 1);
    assert_eq!(harness.engine.counters().streams_released(), 1);
}

#[tokio::test]
async fn test_mid_stream_fault_ends_body_early() {
    let harness = Harness::new();
    let id = ContentId::parse(&"f".repeat(40)).unwrap();
    harness.engine.add_content(SimulatedContent::new(
        id.clone(),
        "Broken",
        vec![
            SimulatedFile::in_memory("broken.mp4", movie_bytes())
                .with_fault(2, io::ErrorKind::Other),
        ],
    ));
    harness.add(id.as_str(), 0).await;

    let response = harness.get(&format!("/stream/{id}/0"), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let received = body_bytes(response).await;
    assert_eq!(&received[..], &movie_bytes()[..32]);
    assert_eq!(harness.engine.counters().streams_released(), 1);
}

#[tokio::test]
async fn test_fault_before_first_byte_is_server_error() {
    let harness = Harness::new();
    let id = ContentId::parse(&"e".repeat(40)).unwrap();
    harness.engine.add_content(SimulatedContent::new(
        id.clone(),
        "Broken",
        vec![
            SimulatedFile::in_memory("broken.mp4", movie_bytes())
                .with_fault(0, io::ErrorKind::Other),
        ],
    ));
    harness.add(id.as_str(), 0).await;

    let response = harness.get(&format!("/stream/{id}/0"), None).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(harness.engine.counters().streams_released(), 1);
}

#[tokio::test]
async fn test_peer_closed_error_is_swallowed() {
    let harness = Harness::new();
    let id = ContentId::parse(&"d".repeat(40)).unwrap();
    harness.engine.add_content(SimulatedContent::new(
        id.clone(),
        "Flaky",
        vec![
            SimulatedFile::in_memory("flaky.mp4", movie_bytes())
                .with_fault(1, io::ErrorKind::BrokenPipe),
        ],
    ));
    harness.add(id.as_str(), 0).await;

    let response = harness
        .get(&format!("/stream/{id}/0"), Some("bytes=0-99"))
        .await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let received = tokio::time::timeout(Duration::from_secs(5), body_bytes(response))
        .await
        .unwrap();
    assert_eq!(&received[..], &movie_bytes()[..16]);
}
