//! Listener, admission control and connection supervision.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use vidserve_core::config::ServerConfig;
use vidserve_core::{JobCoordinator, VidserveConfig, VidserveError};

use crate::http::Response;
use crate::router::Router;
use crate::session::{SessionLimits, run_session};

/// Pause after a failed accept so fd exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listener plus everything needed to serve connections on it.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    router: Arc<Router>,
    limits: SessionLimits,
    max_connections: usize,
}

impl Server {
    /// Bind the configured address and wire the ffmpeg-backed coordinator.
    ///
    /// # Errors
    ///
    /// - `VidserveError::Configuration` - Invalid limits in `config`
    /// - `VidserveError::Io` - The address could not be bound
    pub async fn bind(config: &VidserveConfig) -> Result<Self, VidserveError> {
        config.validate()?;
        let coordinator = JobCoordinator::with_ffmpeg(config.transcode.clone());
        let router = Router::new(config.server.root.clone(), coordinator);
        Self::bind_with(&config.server, router).await
    }

    /// Bind using an already constructed router.
    ///
    /// # Errors
    ///
    /// - `VidserveError::Io` - The address could not be bound
    pub async fn bind_with(config: &ServerConfig, router: Router) -> Result<Self, VidserveError> {
        let listener = TcpListener::bind(config.bind_address).await?;
        Ok(Self {
            listener,
            router: Arc::new(router),
            limits: SessionLimits::from(config),
            max_connections: config.max_connections,
        })
    }

    /// Address actually bound, useful when the configured port was 0.
    ///
    /// # Errors
    ///
    /// - `VidserveError::Io` - The socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr, VidserveError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` completes, then stop accepting, let in-flight
    /// responses finish, and close idle keep-alive connections.
    ///
    /// Transcoding jobs are not cancelled; their markers stay valid for the
    /// next run.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let slots = Arc::new(Semaphore::new(self.max_connections));
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut sessions = JoinSet::new();

        match self.listener.local_addr() {
            Ok(addr) => info!(
                "Serving {} on http://{}",
                self.router.root().display(),
                addr
            ),
            Err(e) => warn!("Listener has no local address: {}", e),
        }

        tokio::pin!(shutdown);
        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
                // Reap finished sessions so the set does not grow unbounded.
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                    continue;
                }
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
                warn!("Rejecting {}: connection limit reached", peer);
                sessions.spawn(reject_busy(stream));
                continue;
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }
            let router = Arc::clone(&self.router);
            let limits = self.limits;
            let stop = stop_rx.clone();
            sessions.spawn(async move {
                run_session(stream, peer, &router, limits, stop).await;
                drop(permit);
            });
        }

        info!("Shutting down, waiting for {} connections", sessions.len());
        drop(self.listener);
        let _ = stop_tx.send(true);
        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }
        info!("Server stopped");
    }
}

async fn reject_busy(mut stream: TcpStream) {
    let _ = Response::error(StatusCode::SERVICE_UNAVAILABLE)
        .with_header("Retry-After", "1")
        .write_to(&mut stream, false)
        .await;
    let _ = stream.shutdown().await;
}

/// Bind from `config` and serve until ctrl-c.
///
/// # Errors
///
/// - `VidserveError::Configuration` - Invalid configuration
/// - `VidserveError::Io` - The address could not be bound
pub async fn run_server(config: VidserveConfig) -> Result<(), VidserveError> {
    let server = Server::bind(&config).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::sync::oneshot;
    use vidserve_core::transcode::test_fixtures::{FakeProber, FakeTranscoder, create_media_root};

    use super::*;

    async fn start(
        root: &std::path::Path,
        max_connections: usize,
    ) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let mut config = VidserveConfig::for_testing();
        config.server.root = root.to_path_buf();
        config.server.max_connections = max_connections;
        let coordinator = JobCoordinator::new(
            config.transcode.clone(),
            Arc::new(FakeProber::video_and_audio()),
            Arc::new(FakeTranscoder::succeeding(Duration::ZERO)),
        );
        let router = Router::new(root.to_path_buf(), coordinator);
        let server = Server::bind_with(&config.server, router).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));
        (addr, tx, handle)
    }

    #[tokio::test]
    async fn test_serves_and_shuts_down() {
        let (dir, _) = create_media_root();
        let (addr, stop, handle) = start(dir.path(), 4).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /notes.txt HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 200 OK"));
        assert!(out.ends_with("hello"));

        stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_keep_alive() {
        let (dir, _) = create_media_root();
        let (addr, stop, handle) = start(dir.path(), 4).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /notes.txt HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("keep-alive"));

        stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_over_limit_with_503() {
        let (dir, _) = create_media_root();
        let (addr, _stop, _handle) = start(dir.path(), 1).await;

        // Hold the only slot with an idle keep-alive connection.
        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(b"GET /notes.txt HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        first.read(&mut buf).await.unwrap();

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut out = String::new();
        second.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 503 Service Unavailable"));
        assert!(out.contains("Connection: close"));
    }
}
