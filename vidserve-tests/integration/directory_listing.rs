//! Directory listings, redirects and path handling.

use crate::support::TestServer;

#[tokio::test]
async fn test_root_listing_links_streams_for_containers() {
    let server = TestServer::start().await;
    std::fs::create_dir(server.root.path().join("shows")).unwrap();

    let response = server.get("/").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Type"), Some("text/html; charset=utf-8"));

    let page = response.text();
    assert!(page.contains("href=\"/movie.mkv\""));
    assert!(page.contains("href=\"/movie.mkv?mode=hls\""));
    assert!(page.contains("href=\"/notes.txt\""));
    assert!(!page.contains("/notes.txt?mode=hls"));
    assert!(page.contains("href=\"/shows/\""));

    server.shutdown().await;
}

#[tokio::test]
async fn test_directory_without_slash_redirects() {
    let server = TestServer::start().await;
    server.write_file("Season 1/ep1.mkv", b"episode");

    let response = server.get("/Season%201").await;
    assert_eq!(response.status, 302);
    assert_eq!(response.header("Location"), Some("/Season%201/"));

    let listing = server.get("/Season%201/").await;
    assert_eq!(listing.status, 200);
    assert!(listing.text().contains("href=\"/Season%201/ep1.mkv?mode=hls\""));

    server.shutdown().await;
}

#[tokio::test]
async fn test_index_file_replaces_listing() {
    let server = TestServer::start().await;
    server.write_file("site/index.html", b"<h1>Welcome</h1>");

    let response = server.get("/site/").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "<h1>Welcome</h1>");

    server.shutdown().await;
}

#[tokio::test]
async fn test_dot_segments_cannot_escape_root() {
    let server = TestServer::start().await;

    let response = server.get("/../../notes.txt").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "hello");

    let response = server.get("/a/./../notes.txt").await;
    assert_eq!(response.status, 200);

    let response = server.get("/../../etc/passwd").await;
    assert_eq!(response.status, 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_path_is_404_and_keeps_connection() {
    let server = TestServer::start().await;
    let mut connection = server.connect().await;

    connection.send("GET /nope.mkv HTTP/1.1\r\n\r\n").await;
    let response = connection.read_response().await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.header("Connection"), Some("keep-alive"));

    connection
        .send("GET /notes.txt HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await;
    assert_eq!(connection.read_response().await.unwrap().status, 200);

    server.shutdown().await;
}

#[tokio::test]
async fn test_percent_encoded_names() {
    let server = TestServer::start().await;
    server.write_file("My Film (2020).txt", b"credits");

    let response = server.get("/My%20Film%20%282020%29.txt").await;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "credits");

    server.shutdown().await;
}
