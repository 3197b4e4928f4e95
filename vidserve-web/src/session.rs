//! One client connection: read a request, answer it, repeat while keep-alive holds.

use std::net::SocketAddr;
use std::time::Duration;

use http::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, trace};
use vidserve_core::config::ServerConfig;

use crate::http::{ProtocolError, Response, find_head_end, parse_request};
use crate::router::Router;

/// Request bodies up to this size are read and dropped to keep the
/// connection usable; larger ones end the session after the response.
const MAX_DISCARDED_BODY: u64 = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Per-connection limits taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_header_bytes: usize,
    pub idle_timeout: Option<Duration>,
}

impl From<&ServerConfig> for SessionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_header_bytes: config.max_header_bytes,
            idle_timeout: config.idle_timeout,
        }
    }
}

enum ReadOutcome {
    Data,
    Closed,
    TimedOut,
    Shutdown,
}

/// Serve requests on `stream` until the client leaves, keep-alive ends,
/// a protocol error occurs, the connection idles out, or `shutdown` flips.
///
/// Bytes received after one request head are kept for the next one.
pub async fn run_session<S>(
    mut stream: S,
    peer: SocketAddr,
    router: &Router,
    limits: SessionLimits,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let head_end = loop {
            if let Some(end) = find_head_end(&buf) {
                break Some(end);
            }
            if buf.len() >= limits.max_header_bytes {
                break None;
            }
            match read_more(&mut stream, &mut buf, limits.idle_timeout, &mut shutdown).await {
                ReadOutcome::Data => {}
                ReadOutcome::Closed => return,
                ReadOutcome::TimedOut => {
                    debug!("Closing idle connection from {}", peer);
                    return;
                }
                ReadOutcome::Shutdown => return,
            }
        };

        let head_end = match head_end {
            Some(end) if end <= limits.max_header_bytes => end,
            _ => {
                let error = ProtocolError::HeadTooLarge {
                    limit: limits.max_header_bytes,
                };
                reject(&mut stream, peer, &error).await;
                return;
            }
        };

        let head: Vec<u8> = buf.drain(..head_end).collect();
        let mut request = match parse_request(&head) {
            Ok(request) => request,
            Err(error) => {
                reject(&mut stream, peer, &error).await;
                return;
            }
        };

        if request.body_length > 0 {
            let unread = request.body_length.saturating_sub(buf.len() as u64);
            if unread > MAX_DISCARDED_BODY {
                buf.clear();
                request.keep_alive = false;
            } else {
                // Bounded by the buffered bytes plus MAX_DISCARDED_BODY.
                let length = request.body_length as usize;
                while buf.len() < length {
                    match read_more(&mut stream, &mut buf, limits.idle_timeout, &mut shutdown).await
                    {
                        ReadOutcome::Data => {}
                        ReadOutcome::Closed | ReadOutcome::Shutdown => return,
                        ReadOutcome::TimedOut => {
                            debug!("Timed out waiting for request body from {}", peer);
                            return;
                        }
                    }
                }
                buf.drain(..length);
            }
        }

        let response = match router.route(&request).await {
            Ok(response) => response,
            Err(error) => {
                reject(&mut stream, peer, &error).await;
                return;
            }
        };

        let keep_alive = request.keep_alive && !*shutdown.borrow();
        debug!(
            "{} \"{} {}\" {}",
            peer,
            request.method,
            request.target,
            response.status().as_u16()
        );
        if let Err(e) = response.write_to(&mut stream, keep_alive).await {
            debug!("Write to {} failed: {}", peer, e);
            return;
        }
        if !keep_alive {
            break;
        }
    }

    let _ = stream.shutdown().await;
}

async fn read_more<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    idle_timeout: Option<Duration>,
    shutdown: &mut watch::Receiver<bool>,
) -> ReadOutcome
where
    S: AsyncRead + Unpin,
{
    buf.reserve(READ_CHUNK);
    let read = async {
        match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, stream.read_buf(buf)).await.ok(),
            None => Some(stream.read_buf(buf).await),
        }
    };

    tokio::select! {
        result = read => match result {
            None => ReadOutcome::TimedOut,
            Some(Ok(0)) => ReadOutcome::Closed,
            Some(Ok(n)) => {
                trace!("Read {} bytes", n);
                ReadOutcome::Data
            }
            Some(Err(e)) => {
                debug!("Read failed: {}", e);
                ReadOutcome::Closed
            }
        },
        _ = shutdown.changed() => ReadOutcome::Shutdown,
    }
}

async fn reject<S>(stream: &mut S, peer: SocketAddr, error: &ProtocolError)
where
    S: AsyncWrite + Unpin,
{
    debug!("Bad request from {}: {}", peer, error);
    let _ = Response::error(StatusCode::BAD_REQUEST)
        .write_to(stream, false)
        .await;
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::DuplexStream;
    use vidserve_core::transcode::test_fixtures::{FakeProber, FakeTranscoder, create_media_root};
    use vidserve_core::{JobCoordinator, VidserveConfig};

    use super::*;

    const PEER: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 9);

    fn limits() -> SessionLimits {
        SessionLimits {
            max_header_bytes: 256,
            idle_timeout: Some(Duration::from_secs(2)),
        }
    }

    /// Start a session over an in-memory pipe and hand back the client end
    /// and the shutdown switch.
    fn open_session(
        root: &std::path::Path,
        limits: SessionLimits,
    ) -> (DuplexStream, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let router = Router::new(
            root.to_path_buf(),
            JobCoordinator::new(
                VidserveConfig::for_testing().transcode,
                Arc::new(FakeProber::video_and_audio()),
                Arc::new(FakeTranscoder::succeeding(Duration::ZERO)),
            ),
        );
        let (client, server): (DuplexStream, DuplexStream) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = watch::channel(false);
        let session = tokio::spawn(async move {
            run_session(server, PEER, &router, limits, rx).await;
        });
        (client, tx, session)
    }

    /// Run a session, send `input`, half-close, and collect everything the
    /// server wrote.
    async fn exchange(root: &std::path::Path, input: &[u8]) -> String {
        let (client, _tx, session) = open_session(root, limits());
        let (mut read_half, mut write_half) = tokio::io::split(client);
        write_half.write_all(input).await.unwrap();
        write_half.shutdown().await.unwrap();
        let mut out = Vec::new();
        read_half.read_to_end(&mut out).await.unwrap();
        session.await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    #[tokio::test]
    async fn test_two_requests_on_one_connection() {
        let (dir, _) = create_media_root();
        let out = exchange(
            dir.path(),
            b"GET /notes.txt HTTP/1.1\r\n\r\nGET /notes.txt HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.contains("Connection: keep-alive"));
        assert!(out.trim_end().ends_with("hello"));
        assert_eq!(out.matches("Connection: close").count(), 1);
    }

    #[tokio::test]
    async fn test_http10_closes_after_one() {
        let (dir, _) = create_media_root();
        let out = exchange(
            dir.path(),
            b"GET /notes.txt HTTP/1.0\r\n\r\nGET /notes.txt HTTP/1.0\r\n\r\n",
        )
        .await;
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 1);
        assert!(out.contains("Connection: close"));
    }

    #[tokio::test]
    async fn test_not_found_keeps_connection() {
        let (dir, _) = create_media_root();
        let out = exchange(
            dir.path(),
            b"GET /missing HTTP/1.1\r\n\r\nGET /notes.txt HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 404 Not Found"));
        assert!(out.contains("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn test_oversized_head_rejected() {
        let (dir, _) = create_media_root();
        let mut input = b"GET / HTTP/1.1\r\nX-Fill: ".to_vec();
        input.extend(std::iter::repeat_n(b'a', 1024));
        let out = exchange(dir.path(), &input).await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request"));
        assert!(out.contains("Connection: close"));
    }

    #[tokio::test]
    async fn test_bad_range_rejected_and_closed() {
        let (dir, _) = create_media_root();
        let out = exchange(
            dir.path(),
            b"GET /notes.txt HTTP/1.1\r\nRange: bytes=10-5\r\n\r\nGET /notes.txt HTTP/1.1\r\n\r\n",
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request"));
        assert_eq!(out.matches("HTTP/1.1").count(), 1);
    }

    #[tokio::test]
    async fn test_request_body_is_skipped() {
        let (dir, _) = create_media_root();
        let out = exchange(
            dir.path(),
            b"GET /notes.txt HTTP/1.1\r\nContent-Length: 4\r\n\r\nJUNKGET /notes.txt HTTP/1.1\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
    }

    #[tokio::test]
    async fn test_client_eof_ends_quietly() {
        let (dir, _) = create_media_root();
        let out = exchange(dir.path(), b"GET /notes.txt HTTP/1.1\r\nHost").await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_missing_body_times_out() {
        let (dir, _) = create_media_root();
        let limits = SessionLimits {
            max_header_bytes: 256,
            idle_timeout: Some(Duration::from_millis(100)),
        };
        let (mut client, _tx, session) = open_session(dir.path(), limits);

        // The head promises a body that never arrives; the client stays open.
        client
            .write_all(b"GET /notes.txt HTTP/1.1\r\nContent-Length: 10\r\n\r\n")
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session kept waiting for the body")
            .unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_body() {
        let (dir, _) = create_media_root();
        let limits = SessionLimits {
            max_header_bytes: 256,
            idle_timeout: None,
        };
        let (mut client, tx, session) = open_session(dir.path(), limits);

        client
            .write_all(b"GET /notes.txt HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("shutdown did not end the session")
            .unwrap();
    }

    #[tokio::test]
    async fn test_large_body_closes_after_response() {
        let (dir, _) = create_media_root();
        let out = exchange(
            dir.path(),
            b"GET /notes.txt HTTP/1.1\r\nContent-Length: 1000000\r\n\r\nGET /notes.txt HTTP/1.1\r\n\r\n",
        )
        .await;
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 1);
        assert!(out.contains("Connection: close"));
    }
}
