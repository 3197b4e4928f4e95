//! Responses and their serialization onto the connection.

use std::io;

use http::StatusCode;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::HeaderList;
use crate::templates;

/// Response payload.
#[derive(Debug)]
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    /// `len` bytes of an open file, read from its current position
    File { file: File, len: u64 },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Bytes(bytes) => bytes.len() as u64,
            Body::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Status, headers and body of one response.
///
/// `Content-Length` and `Connection` are added when the response is
/// written, so handlers never set them.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderList,
    body: Body,
}

impl Response {
    pub fn new(status: StatusCode, body: Body) -> Self {
        Self {
            status,
            headers: HeaderList::new(),
            body,
        }
    }

    pub fn html(status: StatusCode, page: String) -> Self {
        Self::new(status, Body::Bytes(page.into_bytes()))
            .with_header("Content-Type", "text/html; charset=utf-8")
    }

    /// HTML error page for `status`.
    pub fn error(status: StatusCode) -> Self {
        Self::html(status, templates::error_page(status))
    }

    /// Redirect to `location`.
    pub fn redirect(location: &str) -> Self {
        Self::new(StatusCode::FOUND, Body::Empty).with_header("Location", location)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderList {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Serialize the status line, headers and body onto `writer`.
    ///
    /// # Errors
    ///
    /// - `io::Error` - The connection failed, or a file body ended before
    ///   its declared length (the peer can no longer trust the framing)
    pub async fn write_to<W>(self, writer: &mut W, keep_alive: bool) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("Unknown")
        );
        for (name, value) in self.headers.iter() {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        head.push_str(if keep_alive {
            "Connection: keep-alive\r\n\r\n"
        } else {
            "Connection: close\r\n\r\n"
        });
        writer.write_all(head.as_bytes()).await?;

        match self.body {
            Body::Empty => {}
            Body::Bytes(bytes) => writer.write_all(&bytes).await?,
            Body::File { file, len } => {
                let copied = tokio::io::copy(&mut file.take(len), writer).await?;
                if copied != len {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("file body ended after {copied} of {len} bytes"),
                    ));
                }
            }
        }
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use std::io::SeekFrom;

    use tokio::io::AsyncSeekExt;

    use super::*;

    async fn render(response: Response, keep_alive: bool) -> String {
        let mut out = Vec::new();
        response.write_to(&mut out, keep_alive).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_bytes_response_framing() {
        let response = Response::new(StatusCode::OK, Body::Bytes(b"hello".to_vec()))
            .with_header("Content-Type", "text/plain");
        let raw = render(response, true).await;
        assert_eq!(
            raw,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\
             Connection: keep-alive\r\n\r\nhello"
        );
    }

    #[tokio::test]
    async fn test_redirect_closes_when_asked() {
        let raw = render(Response::redirect("/dir/"), false).await;
        assert!(raw.starts_with("HTTP/1.1 302 Found\r\nLocation: /dir/\r\n"));
        assert!(raw.ends_with("Content-Length: 0\r\nConnection: close\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_file_window() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut file = File::open(&path).await.unwrap();
        file.seek(SeekFrom::Start(3)).await.unwrap();
        let response = Response::new(StatusCode::PARTIAL_CONTENT, Body::File { file, len: 4 });
        let raw = render(response, true).await;
        assert!(raw.starts_with("HTTP/1.1 206 Partial Content\r\n"));
        assert!(raw.contains("Content-Length: 4\r\n"));
        assert!(raw.ends_with("\r\n\r\n3456"));
    }

    #[tokio::test]
    async fn test_short_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"abc").unwrap();

        let file = File::open(&path).await.unwrap();
        let response = Response::new(StatusCode::OK, Body::File { file, len: 10 });
        let mut out = Vec::new();
        let err = response.write_to(&mut out, true).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
