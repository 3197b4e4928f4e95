//! Shared harness: a live server over a temporary media root, plus a
//! minimal raw HTTP client that can read several responses per connection.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use vidserve_core::transcode::test_fixtures::{FakeProber, FakeTranscoder, create_media_root};
use vidserve_core::{JobCoordinator, VidserveConfig};
use vidserve_web::{Router, Server};

/// A running server and handles to its fakes.
pub struct TestServer {
    pub addr: SocketAddr,
    pub root: tempfile::TempDir,
    pub movie: PathBuf,
    pub prober: Arc<FakeProber>,
    pub transcoder: Arc<FakeTranscoder>,
    pub coordinator: JobCoordinator,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Server with a prober reporting video and audio and a transcoder
    /// that succeeds after a short delay.
    pub async fn start() -> Self {
        Self::start_with(
            FakeProber::video_and_audio(),
            FakeTranscoder::succeeding(Duration::from_millis(200)),
            |_| {},
        )
        .await
    }

    pub async fn start_with(
        prober: FakeProber,
        transcoder: FakeTranscoder,
        configure: impl FnOnce(&mut VidserveConfig),
    ) -> Self {
        let (root, movie) = create_media_root();
        let mut config = VidserveConfig::for_testing();
        config.server.root = root.path().to_path_buf();
        configure(&mut config);

        let prober = Arc::new(prober);
        let transcoder = Arc::new(transcoder);
        let coordinator = JobCoordinator::new(
            config.transcode.clone(),
            prober.clone(),
            transcoder.clone(),
        );
        let router = Router::new(config.server.root.clone(), coordinator.clone());
        let server = Server::bind_with(&config.server, router)
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr().expect("Bound server has an address");

        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stopped.await;
        }));

        Self {
            addr,
            root,
            movie,
            prober,
            transcoder,
            coordinator,
            stop,
            handle,
        }
    }

    /// Write `contents` to `name` under the serving root.
    pub fn write_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.root.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        std::fs::write(&path, contents).expect("Failed to write file");
        path
    }

    pub async fn connect(&self) -> Connection {
        Connection::open(self.addr).await
    }

    /// One request on a fresh connection; the response is read to EOF.
    pub async fn get(&self, target: &str) -> RawResponse {
        let mut connection = self.connect().await;
        connection
            .send(&format!("GET {target} HTTP/1.1\r\nConnection: close\r\n\r\n"))
            .await;
        connection
            .read_response()
            .await
            .expect("Server closed without responding")
    }

    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("Server did not stop in time")
            .expect("Server task panicked");
    }
}

/// A parsed response.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn closes(&self) -> bool {
        self.header("Connection") == Some("close")
    }
}

/// Client side of one TCP connection.
pub struct Connection {
    reader: BufReader<TcpStream>,
}

impl Connection {
    pub async fn open(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to connect to test server");
        Self {
            reader: BufReader::new(stream),
        }
    }

    pub async fn send(&mut self, raw: &str) {
        self.send_bytes(raw.as_bytes()).await;
    }

    pub async fn send_bytes(&mut self, raw: &[u8]) {
        self.reader
            .get_mut()
            .write_all(raw)
            .await
            .expect("Failed to write request");
    }

    /// Read one response framed by `Content-Length`, or `None` at EOF.
    pub async fn read_response(&mut self) -> Option<RawResponse> {
        let mut status_line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut status_line))
            .await
            .expect("Timed out waiting for a response")
            .ok()?;
        if read == 0 {
            return None;
        }
        let status = status_line
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .expect("Malformed status line");

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            self.reader
                .read_line(&mut line)
                .await
                .expect("Failed to read header line");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':').expect("Malformed header line");
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        let length: usize = headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse().ok())
            .expect("Response without Content-Length");
        let mut body = vec![0u8; length];
        self.reader
            .read_exact(&mut body)
            .await
            .expect("Response body shorter than Content-Length");

        Some(RawResponse {
            status,
            headers,
            body,
        })
    }

    /// Whether the server has closed its side of the connection.
    pub async fn is_closed(&mut self) -> bool {
        let mut byte = [0u8; 1];
        match tokio::time::timeout(Duration::from_secs(5), self.reader.read(&mut byte)).await {
            Ok(Ok(0)) | Ok(Err(_)) => true,
            Ok(Ok(_)) => false,
            Err(_) => false,
        }
    }
}
