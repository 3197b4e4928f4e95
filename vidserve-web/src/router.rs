//! Maps a parsed request onto the serving root.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use http::StatusCode;
use tokio::fs::File;
use tokio::io::AsyncSeekExt;
use tracing::{debug, error, warn};
use vidserve_core::transcode::markers::MANIFEST_FILE;
use vidserve_core::{JobCoordinator, JobState};

use crate::http::{Body, ProtocolError, Request, Response};
use crate::templates::{self, ListingEntry};
use crate::{mime, paths};

/// Query flag selecting streaming mode for a video file.
pub const STREAM_QUERY_FLAG: &str = "mode=hls";

/// File served in place of a listing when present in a directory.
pub const INDEX_FILE: &str = "index.html";

/// Chooses between file, range, listing and streaming-mode responses.
#[derive(Debug, Clone)]
pub struct Router {
    root: PathBuf,
    coordinator: JobCoordinator,
}

impl Router {
    pub fn new(root: PathBuf, coordinator: JobCoordinator) -> Self {
        Self { root, coordinator }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn coordinator(&self) -> &JobCoordinator {
        &self.coordinator
    }

    /// Build the response for `request`.
    ///
    /// Missing paths become 404 and filesystem failures 500; both leave the
    /// connection usable.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnsatisfiableRange` - The requested range selects no byte of the file
    pub async fn route(&self, request: &Request) -> Result<Response, ProtocolError> {
        let fs_path = paths::resolve(&self.root, &request.path);

        let metadata = match tokio::fs::metadata(&fs_path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("{} not found: {}", fs_path.display(), e);
                return Ok(Response::error(StatusCode::NOT_FOUND));
            }
        };

        if metadata.is_dir() {
            return Ok(self.directory(request, &fs_path).await);
        }
        if !metadata.is_file() {
            return Ok(Response::error(StatusCode::NOT_FOUND));
        }

        let file = match File::open(&fs_path).await {
            Ok(file) => file,
            Err(e) => {
                debug!("Cannot open {}: {}", fs_path.display(), e);
                return Ok(Response::error(StatusCode::NOT_FOUND));
            }
        };

        let content_type = mime::content_type_for(&fs_path);
        if self.wants_stream(request, &fs_path, &content_type) {
            return Ok(self.stream(request, &fs_path).await);
        }

        self.file(request, file, metadata.len(), content_type).await
    }

    fn wants_stream(&self, request: &Request, fs_path: &Path, content_type: &str) -> bool {
        mime::is_video(content_type)
            && has_extension(fs_path, &self.coordinator.config().container_extension)
            && request.has_query_flag(STREAM_QUERY_FLAG)
            && request.range.is_none()
    }

    async fn stream(&self, request: &Request, fs_path: &Path) -> Response {
        let title = display_name(&request.path);
        match self.coordinator.request(fs_path).await {
            Ok(JobState::Ready) => {
                let manifest = format!(
                    "{}{}/{}",
                    request.path,
                    self.coordinator.config().output_suffix,
                    MANIFEST_FILE
                );
                Response::html(
                    StatusCode::OK,
                    templates::player_page(title, &paths::encode_url_path(&manifest)),
                )
                .with_header("Cache-Control", "no-cache, no-store, must-revalidate")
            }
            Ok(JobState::Processing | JobState::NotStarted) => {
                Response::html(StatusCode::OK, templates::processing_page(title))
                    .with_header("Cache-Control", "no-cache")
            }
            Ok(JobState::Failed(diagnostic)) => Response::html(
                StatusCode::INTERNAL_SERVER_ERROR,
                templates::failure_page(title, &diagnostic),
            ),
            Err(e) => {
                error!("Transcode coordination failed for {}: {}", fs_path.display(), e);
                Response::html(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    templates::failure_page(title, &e.to_string()),
                )
            }
        }
    }

    async fn file(
        &self,
        request: &Request,
        mut file: File,
        size: u64,
        content_type: String,
    ) -> Result<Response, ProtocolError> {
        let Some(range) = request.range else {
            return Ok(Response::new(StatusCode::OK, Body::File { file, len: size })
                .with_header("Content-Type", content_type)
                .with_header("Accept-Ranges", "bytes"));
        };

        let resolved = range
            .resolve(size)
            .ok_or_else(|| ProtocolError::UnsatisfiableRange {
                value: request.headers.get("range").unwrap_or_default().to_string(),
                size,
            })?;

        if let Err(e) = file.seek(SeekFrom::Start(resolved.start)).await {
            warn!("Seek to {} failed: {}", resolved.start, e);
            return Ok(Response::error(StatusCode::INTERNAL_SERVER_ERROR));
        }

        Ok(Response::new(
            StatusCode::PARTIAL_CONTENT,
            Body::File {
                file,
                len: resolved.content_length(),
            },
        )
        .with_header("Content-Type", content_type)
        .with_header("Accept-Ranges", "bytes")
        .with_header("Content-Range", resolved.content_range()))
    }

    async fn directory(&self, request: &Request, fs_path: &Path) -> Response {
        if !request.trailing_slash && !request.path.is_empty() {
            let mut location = paths::encode_url_path(&format!("{}/", request.path));
            if let Some(query) = &request.query {
                location.push('?');
                location.push_str(query);
            }
            return Response::redirect(&location);
        }

        let index = fs_path.join(INDEX_FILE);
        if tokio::fs::metadata(&index).await.is_ok_and(|m| m.is_file()) {
            return match tokio::fs::read(&index).await {
                Ok(page) => Response::new(StatusCode::OK, Body::Bytes(page))
                    .with_header("Content-Type", "text/html; charset=utf-8"),
                Err(e) => {
                    warn!("Cannot read {}: {}", index.display(), e);
                    Response::error(StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
        }

        match self.list_directory(&request.path, fs_path).await {
            Ok(entries) => {
                let display = if request.path.is_empty() {
                    "/".to_string()
                } else {
                    format!("/{}/", request.path)
                };
                Response::html(StatusCode::OK, templates::listing_page(&display, &entries))
            }
            Err(e) => {
                warn!("Cannot list {}: {}", fs_path.display(), e);
                Response::error(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    async fn list_directory(
        &self,
        relative: &str,
        fs_path: &Path,
    ) -> std::io::Result<Vec<ListingEntry>> {
        let extension = &self.coordinator.config().container_extension;
        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(fs_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // Follow symlinks so linked directories list as directories.
            let is_dir = match tokio::fs::metadata(entry.path()).await {
                Ok(metadata) => metadata.is_dir(),
                Err(_) => entry.file_type().await?.is_dir(),
            };
            found.push((name, is_dir));
        }
        found.sort();

        Ok(found
            .into_iter()
            .map(|(name, is_dir)| {
                let child = if relative.is_empty() {
                    name.clone()
                } else {
                    format!("{relative}/{name}")
                };
                let href = paths::encode_url_path(&child);
                if is_dir {
                    ListingEntry {
                        label: format!("{name}/"),
                        href: format!("{href}/"),
                        stream_href: None,
                    }
                } else {
                    let stream_href = has_extension(Path::new(&name), extension)
                        .then(|| format!("{href}?{STREAM_QUERY_FLAG}"));
                    ListingEntry {
                        label: name,
                        href,
                        stream_href,
                    }
                }
            })
            .collect())
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

fn display_name(relative: &str) -> &str {
    relative.rsplit('/').next().unwrap_or(relative)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use vidserve_core::VidserveConfig;
    use vidserve_core::transcode::test_fixtures::{FakeProber, FakeTranscoder, create_media_root};

    use super::*;
    use crate::http::parse_request;

    fn router_for(root: &Path, transcoder: Arc<FakeTranscoder>) -> Router {
        let coordinator = JobCoordinator::new(
            VidserveConfig::for_testing().transcode,
            Arc::new(FakeProber::video_and_audio()),
            transcoder,
        );
        Router::new(root.to_path_buf(), coordinator)
    }

    fn get(target: &str, extra: &str) -> Request {
        parse_request(format!("GET {target} HTTP/1.1\r\n{extra}\r\n").as_bytes()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let mut out = Vec::new();
        response.write_to(&mut out, true).await.unwrap();
        let raw = String::from_utf8_lossy(&out).into_owned();
        raw.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let (dir, _) = create_media_root();
        let router = router_for(dir.path(), Arc::new(FakeTranscoder::succeeding(Duration::ZERO)));
        let response = router.route(&get("/nope.txt", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_full_file() {
        let (dir, _) = create_media_root();
        let router = router_for(dir.path(), Arc::new(FakeTranscoder::succeeding(Duration::ZERO)));
        let response = router.route(&get("/notes.txt", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("accept-ranges"), Some("bytes"));
        assert_eq!(
            response.headers().get("content-type"),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(body_text(response).await, "hello");
    }

    #[tokio::test]
    async fn test_range_file() {
        let (dir, _) = create_media_root();
        let router = router_for(dir.path(), Arc::new(FakeTranscoder::succeeding(Duration::ZERO)));
        let response = router
            .route(&get("/notes.txt", "Range: bytes=1-3\r\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers().get("content-range"), Some("bytes 1-3/5"));
        assert_eq!(body_text(response).await, "ell");
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_is_protocol_error() {
        let (dir, _) = create_media_root();
        let router = router_for(dir.path(), Arc::new(FakeTranscoder::succeeding(Duration::ZERO)));
        let result = router.route(&get("/notes.txt", "Range: bytes=50-\r\n")).await;
        assert!(matches!(
            result,
            Err(ProtocolError::UnsatisfiableRange { size: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_directory_redirect_and_listing() {
        let (dir, _) = create_media_root();
        std::fs::create_dir(dir.path().join("Sub Dir")).unwrap();
        std::fs::write(dir.path().join("Sub Dir").join("b.mkv"), b"x").unwrap();
        let router = router_for(dir.path(), Arc::new(FakeTranscoder::succeeding(Duration::ZERO)));

        let response = router.route(&get("/Sub%20Dir?x=1", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get("location"), Some("/Sub%20Dir/?x=1"));

        let response = router.route(&get("/Sub%20Dir/", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_text(response).await;
        assert!(page.contains("href=\"/Sub%20Dir/b.mkv\""));
        assert!(page.contains("href=\"/Sub%20Dir/b.mkv?mode=hls\""));

        let page = body_text(router.route(&get("/", "")).await.unwrap()).await;
        assert!(page.contains("href=\"/Sub%20Dir/\">Sub Dir/</a>"));
        let notes = page.find("notes.txt").unwrap();
        let movie = page.find("movie.mkv").unwrap();
        assert!(movie < notes);
    }

    #[tokio::test]
    async fn test_index_html_served_for_directory() {
        let (dir, _) = create_media_root();
        std::fs::write(dir.path().join("index.html"), "<p>home</p>").unwrap();
        let router = router_for(dir.path(), Arc::new(FakeTranscoder::succeeding(Duration::ZERO)));
        let response = router.route(&get("/", "")).await.unwrap();
        assert_eq!(body_text(response).await, "<p>home</p>");
    }

    #[tokio::test]
    async fn test_stream_mode_lifecycle() {
        let (dir, movie) = create_media_root();
        let transcoder = Arc::new(FakeTranscoder::succeeding(Duration::from_millis(50)));
        let router = router_for(dir.path(), transcoder.clone());

        let response = router.route(&get("/movie.mkv?mode=hls", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("cache-control"), Some("no-cache"));
        assert!(body_text(response).await.contains("Processing Video"));

        router.coordinator().wait_for_completion(&movie).await;
        let response = router.route(&get("/movie.mkv?mode=hls", "")).await.unwrap();
        assert_eq!(
            response.headers().get("cache-control"),
            Some("no-cache, no-store, must-revalidate")
        );
        assert!(body_text(response).await.contains("/movie.mkv.hls/master.m3u8"));
        assert_eq!(transcoder.calls(), 1);

        let response = router.route(&get("/movie.mkv.hls/master.m3u8", "")).await.unwrap();
        assert_eq!(
            response.headers().get("content-type"),
            Some("application/vnd.apple.mpegurl")
        );
    }

    #[tokio::test]
    async fn test_stream_mode_needs_flag_and_no_range() {
        let (dir, _) = create_media_root();
        let transcoder = Arc::new(FakeTranscoder::succeeding(Duration::ZERO));
        let router = router_for(dir.path(), transcoder.clone());

        let response = router.route(&get("/movie.mkv", "")).await.unwrap();
        assert_eq!(response.headers().get("content-type"), Some("video/x-matroska"));

        let response = router
            .route(&get("/movie.mkv?mode=hls", "Range: bytes=0-3\r\n"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(transcoder.calls(), 0);
        assert_eq!(router.coordinator().active_jobs(), 0);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("a/b/c.mkv"), "c.mkv");
        assert_eq!(display_name("c.mkv"), "c.mkv");
    }
}
