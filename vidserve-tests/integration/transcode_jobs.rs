//! Streaming-mode requests driving the conversion job coordinator.

use std::time::{Duration, SystemTime};

use futures::future::join_all;
use vidserve_core::transcode::test_fixtures::{FakeBehavior, FakeProber, FakeTranscoder};
use vidserve_core::transcode::{JobOutcome, LockMarker};

use crate::support::TestServer;

const STREAM: &str = "/movie.mkv?mode=hls";

#[tokio::test]
async fn test_concurrent_stream_requests_start_one_job() {
    let server = TestServer::start().await;

    let responses = join_all((0..16).map(|_| server.get(STREAM))).await;
    for response in &responses {
        assert_eq!(response.status, 200);
        assert!(response.text().contains("Processing Video..."));
        assert_eq!(response.header("Cache-Control"), Some("no-cache"));
    }
    assert_eq!(
        server.coordinator.wait_for_completion(&server.movie).await,
        Some(JobOutcome::Ready)
    );
    assert_eq!(server.transcoder.calls(), 1);
    assert_eq!(server.prober.calls(), 1);

    let ready = server.get(STREAM).await;
    assert_eq!(ready.status, 200);
    assert!(ready.text().contains("/movie.mkv.hls/master.m3u8"));
    assert_eq!(
        ready.header("Cache-Control"),
        Some("no-cache, no-store, must-revalidate")
    );
    assert_eq!(server.transcoder.calls(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_generated_playlist_is_served_as_a_file() {
    let server = TestServer::start().await;

    server.get(STREAM).await;
    server.coordinator.wait_for_completion(&server.movie).await;

    let manifest = server.get("/movie.mkv.hls/master.m3u8").await;
    assert_eq!(manifest.status, 200);
    assert_eq!(
        manifest.header("Content-Type"),
        Some("application/vnd.apple.mpegurl")
    );
    assert!(manifest.text().starts_with("#EXTM3U"));

    let segment = server.get("/movie.mkv.hls/segment_0_000.ts").await;
    assert_eq!(segment.header("Content-Type"), Some("video/mp2t"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_plain_and_ranged_requests_bypass_conversion() {
    let server = TestServer::start().await;

    let plain = server.get("/movie.mkv").await;
    assert_eq!(plain.body, b"matroska bytes");

    let mut connection = server.connect().await;
    connection
        .send("GET /movie.mkv?mode=hls HTTP/1.1\r\nRange: bytes=0-7\r\nConnection: close\r\n\r\n")
        .await;
    let ranged = connection.read_response().await.unwrap();
    assert_eq!(ranged.status, 206);
    assert_eq!(ranged.body, b"matroska");

    server.write_file("clip.mp4", b"mp4");
    let other = server.get("/clip.mp4?mode=hls").await;
    assert_eq!(other.body, b"mp4");

    assert_eq!(server.transcoder.calls(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_failed_conversion_shows_diagnostic_and_sticks() {
    let server = TestServer::start_with(
        FakeProber::video_and_audio(),
        FakeTranscoder::new(FakeBehavior::FailAlways, Duration::from_millis(50)),
        |_| {},
    )
    .await;

    server.get(STREAM).await;
    let outcome = server.coordinator.wait_for_completion(&server.movie).await;
    assert!(matches!(outcome, Some(JobOutcome::Failed(_))));

    let failed = server.get(STREAM).await;
    assert_eq!(failed.status, 500);
    let page = failed.text();
    assert!(page.contains("Conversion Failed"));
    assert!(page.contains("scripted failure"));
    assert!(!server.root.path().join("movie.mkv.hls/master.m3u8").exists());

    server.get(STREAM).await;
    assert_eq!(server.transcoder.calls(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_probe_failure_skips_transcoder() {
    let server = TestServer::start_with(
        FakeProber::failing(),
        FakeTranscoder::succeeding(Duration::ZERO),
        |_| {},
    )
    .await;

    server.get(STREAM).await;
    server.coordinator.wait_for_completion(&server.movie).await;

    assert_eq!(server.get(STREAM).await.status, 500);
    assert_eq!(server.transcoder.calls(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_subtitle_failure_retries_without_subtitles() {
    let server = TestServer::start_with(
        FakeProber::with_subtitles(),
        FakeTranscoder::new(FakeBehavior::FailWithSubtitles, Duration::ZERO),
        |_| {},
    )
    .await;

    server.get(STREAM).await;
    assert_eq!(
        server.coordinator.wait_for_completion(&server.movie).await,
        Some(JobOutcome::Ready)
    );
    assert_eq!(server.transcoder.subtitle_flags(), vec![true, false]);
    assert_eq!(server.get(STREAM).await.status, 200);

    server.shutdown().await;
}

#[tokio::test]
async fn test_stale_lock_is_recovered() {
    let server = TestServer::start().await;
    let output = server.root.path().join("movie.mkv.hls");
    std::fs::create_dir(&output).unwrap();
    std::fs::write(output.join("segment_0_000.ts"), b"leftover").unwrap();
    let abandoned = LockMarker::at(
        std::process::id().wrapping_add(1),
        SystemTime::now() - Duration::from_secs(3600),
    );
    std::fs::write(output.join(".processing"), abandoned.render()).unwrap();

    let response = server.get(STREAM).await;
    assert!(response.text().contains("Processing Video..."));
    assert_eq!(
        server.coordinator.wait_for_completion(&server.movie).await,
        Some(JobOutcome::Ready)
    );
    assert_eq!(server.transcoder.calls(), 1);
    assert!(!output.join(".processing").exists());

    server.shutdown().await;
}

#[tokio::test]
async fn test_live_foreign_lock_is_respected() {
    let server = TestServer::start().await;
    let output = server.root.path().join("movie.mkv.hls");
    std::fs::create_dir(&output).unwrap();
    let other_process = LockMarker::at(std::process::id().wrapping_add(1), SystemTime::now());
    std::fs::write(output.join(".processing"), other_process.render()).unwrap();

    let response = server.get(STREAM).await;
    assert!(response.text().contains("Processing Video..."));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.transcoder.calls(), 0);
    assert!(output.join(".processing").exists());

    server.shutdown().await;
}

#[tokio::test]
async fn test_existing_manifest_never_reconverts() {
    let server = TestServer::start().await;
    server.write_file("movie.mkv.hls/master.m3u8", b"#EXTM3U\n");

    for _ in 0..3 {
        let response = server.get(STREAM).await;
        assert_eq!(response.status, 200);
        assert!(response.text().contains("master.m3u8"));
    }
    assert_eq!(server.transcoder.calls(), 0);
    assert_eq!(server.prober.calls(), 0);

    server.shutdown().await;
}
