//! Byte-range requests against a file with a known byte pattern.

use crate::support::TestServer;

const SIZE: usize = 1000;

fn pattern() -> Vec<u8> {
    (0..SIZE).map(|i| (i % 251) as u8).collect()
}

async fn range(server: &TestServer, value: &str) -> crate::support::RawResponse {
    let mut connection = server.connect().await;
    connection
        .send(&format!(
            "GET /data.bin HTTP/1.1\r\nRange: {value}\r\nConnection: close\r\n\r\n"
        ))
        .await;
    connection.read_response().await.unwrap()
}

#[tokio::test]
async fn test_full_file_advertises_ranges() {
    let server = TestServer::start().await;
    server.write_file("data.bin", &pattern());

    let response = server.get("/data.bin").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Accept-Ranges"), Some("bytes"));
    assert_eq!(response.header("Content-Length"), Some("1000"));
    assert_eq!(response.body, pattern());

    server.shutdown().await;
}

#[tokio::test]
async fn test_closed_range_returns_exact_slice() {
    let server = TestServer::start().await;
    server.write_file("data.bin", &pattern());

    let response = range(&server, "bytes=100-199").await;
    assert_eq!(response.status, 206);
    assert_eq!(response.header("Content-Range"), Some("bytes 100-199/1000"));
    assert_eq!(response.header("Content-Length"), Some("100"));
    assert_eq!(response.body, &pattern()[100..200]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_open_and_suffix_ranges() {
    let server = TestServer::start().await;
    server.write_file("data.bin", &pattern());

    let open = range(&server, "bytes=990-").await;
    assert_eq!(open.status, 206);
    assert_eq!(open.header("Content-Range"), Some("bytes 990-999/1000"));
    assert_eq!(open.body, &pattern()[990..]);

    let suffix = range(&server, "bytes=-50").await;
    assert_eq!(suffix.status, 206);
    assert_eq!(suffix.header("Content-Range"), Some("bytes 950-999/1000"));
    assert_eq!(suffix.body, &pattern()[950..]);

    let oversized_suffix = range(&server, "bytes=-5000").await;
    assert_eq!(oversized_suffix.header("Content-Range"), Some("bytes 0-999/1000"));
    assert_eq!(oversized_suffix.body, pattern());

    server.shutdown().await;
}

#[tokio::test]
async fn test_end_past_eof_is_clamped() {
    let server = TestServer::start().await;
    server.write_file("data.bin", &pattern());

    let response = range(&server, "bytes=900-5000").await;
    assert_eq!(response.status, 206);
    assert_eq!(response.header("Content-Range"), Some("bytes 900-999/1000"));
    assert_eq!(response.body.len(), 100);

    server.shutdown().await;
}

#[tokio::test]
async fn test_inverted_range_is_rejected_and_closes() {
    let server = TestServer::start().await;
    server.write_file("data.bin", &pattern());

    let mut connection = server.connect().await;
    connection
        .send("GET /data.bin HTTP/1.1\r\nRange: bytes=10-5\r\n\r\n")
        .await;
    let response = connection.read_response().await.unwrap();
    assert_eq!(response.status, 400);
    assert!(response.closes());
    assert!(connection.is_closed().await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_start_past_eof_is_rejected() {
    let server = TestServer::start().await;
    server.write_file("data.bin", &pattern());

    let response = range(&server, "bytes=5000-").await;
    assert_eq!(response.status, 400);
    assert!(response.closes());

    server.shutdown().await;
}

#[tokio::test]
async fn test_ranges_on_one_keep_alive_connection() {
    let server = TestServer::start().await;
    server.write_file("data.bin", &pattern());
    let mut connection = server.connect().await;

    for start in [0usize, 250, 500, 750] {
        connection
            .send(&format!(
                "GET /data.bin HTTP/1.1\r\nRange: bytes={}-{}\r\n\r\n",
                start,
                start + 249
            ))
            .await;
        let response = connection.read_response().await.unwrap();
        assert_eq!(response.status, 206);
        assert_eq!(response.body, &pattern()[start..start + 250]);
    }

    server.shutdown().await;
}
