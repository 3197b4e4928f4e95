//! Connection lifetime: keep-alive, close semantics, limits.

use std::time::Duration;

use vidserve_core::transcode::test_fixtures::{FakeProber, FakeTranscoder};

use crate::support::TestServer;

#[tokio::test]
async fn test_http11_serves_sequential_requests_on_one_connection() {
    let server = TestServer::start().await;
    let mut connection = server.connect().await;

    connection.send("GET /notes.txt HTTP/1.1\r\nHost: test\r\n\r\n").await;
    let first = connection.read_response().await.unwrap();
    assert_eq!(first.status, 200);
    assert_eq!(first.header("Connection"), Some("keep-alive"));
    assert_eq!(first.text(), "hello");

    connection.send("GET /movie.mkv HTTP/1.1\r\nHost: test\r\n\r\n").await;
    let second = connection.read_response().await.unwrap();
    assert_eq!(second.status, 200);
    assert_eq!(second.header("Content-Type"), Some("video/x-matroska"));
    assert_eq!(second.body, b"matroska bytes");

    server.shutdown().await;
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let server = TestServer::start().await;
    let mut connection = server.connect().await;

    connection
        .send("GET /notes.txt HTTP/1.1\r\n\r\nGET /missing HTTP/1.1\r\n\r\nGET /notes.txt HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await;
    assert_eq!(connection.read_response().await.unwrap().status, 200);
    assert_eq!(connection.read_response().await.unwrap().status, 404);
    let last = connection.read_response().await.unwrap();
    assert_eq!(last.status, 200);
    assert!(last.closes());
    assert!(connection.is_closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_http10_closes_after_one_response() {
    let server = TestServer::start().await;
    let mut connection = server.connect().await;

    connection.send("GET /notes.txt HTTP/1.0\r\n\r\n").await;
    let response = connection.read_response().await.unwrap();
    assert_eq!(response.status, 200);
    assert!(response.closes());
    assert!(connection.is_closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_connection_close_header_honored() {
    let server = TestServer::start().await;
    let mut connection = server.connect().await;

    connection
        .send("GET /notes.txt HTTP/1.1\r\nConnection: Close\r\n\r\n")
        .await;
    assert!(connection.read_response().await.unwrap().closes());
    assert!(connection.is_closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_request_gets_400_and_close() {
    let server = TestServer::start().await;
    let mut connection = server.connect().await;

    connection.send("BREW /pot HTTP/1.1\r\n\r\n").await;
    let response = connection.read_response().await.unwrap();
    assert_eq!(response.status, 400);
    assert!(response.closes());
    assert!(connection.is_closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_header_block_rejected() {
    let server = TestServer::start_with(
        FakeProber::video_and_audio(),
        FakeTranscoder::succeeding(Duration::ZERO),
        |config| config.server.max_header_bytes = 512,
    )
    .await;
    let mut connection = server.connect().await;

    let mut raw = b"GET /notes.txt HTTP/1.1\r\nX-Padding: ".to_vec();
    raw.extend(std::iter::repeat_n(b'x', 1024));
    connection.send_bytes(&raw).await;
    let response = connection.read_response().await.unwrap();
    assert_eq!(response.status, 400);
    assert!(response.closes());

    server.shutdown().await;
}

#[tokio::test]
async fn test_idle_connection_times_out() {
    let server = TestServer::start_with(
        FakeProber::video_and_audio(),
        FakeTranscoder::succeeding(Duration::ZERO),
        |config| config.server.idle_timeout = Some(Duration::from_millis(200)),
    )
    .await;
    let mut connection = server.connect().await;

    connection.send("GET /notes.txt HTTP/1.1\r\n\r\n").await;
    assert_eq!(connection.read_response().await.unwrap().status, 200);
    assert!(connection.is_closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_connections_over_limit_get_503() {
    let server = TestServer::start_with(
        FakeProber::video_and_audio(),
        FakeTranscoder::succeeding(Duration::ZERO),
        |config| config.server.max_connections = 1,
    )
    .await;

    let mut held = server.connect().await;
    held.send("GET /notes.txt HTTP/1.1\r\n\r\n").await;
    assert_eq!(held.read_response().await.unwrap().status, 200);

    let mut rejected = server.connect().await;
    let response = rejected.read_response().await.unwrap();
    assert_eq!(response.status, 503);
    assert!(response.closes());

    // The slot frees up once the first client leaves.
    drop(held);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.get("/notes.txt").await.status, 200);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_idle_keep_alive_connections() {
    let server = TestServer::start().await;
    let mut connection = server.connect().await;

    connection.send("GET /notes.txt HTTP/1.1\r\n\r\n").await;
    assert_eq!(connection.read_response().await.unwrap().status, 200);

    server.shutdown().await;
    assert!(connection.is_closed().await);
}

#[tokio::test]
async fn test_unsent_request_body_hits_idle_timeout() {
    let server = TestServer::start_with(
        FakeProber::video_and_audio(),
        FakeTranscoder::succeeding(Duration::ZERO),
        |config| config.server.idle_timeout = Some(Duration::from_millis(200)),
    )
    .await;
    let mut connection = server.connect().await;

    connection
        .send("GET /notes.txt HTTP/1.1\r\nContent-Length: 10\r\n\r\n")
        .await;
    assert!(connection.is_closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_does_not_wait_for_request_body() {
    let server = TestServer::start_with(
        FakeProber::video_and_audio(),
        FakeTranscoder::succeeding(Duration::ZERO),
        |config| config.server.idle_timeout = None,
    )
    .await;
    let mut connection = server.connect().await;

    connection
        .send("GET /notes.txt HTTP/1.1\r\nContent-Length: 1000\r\n\r\npartial")
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.shutdown().await;
    assert!(connection.is_closed().await);
}
