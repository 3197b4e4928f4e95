//! Request head parsing.

use super::{ByteRange, HeaderList, ProtocolError};
use crate::paths;

/// Protocol versions the server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// Header slots offered to the parser; more headers than this is a 400.
pub const MAX_HEADERS: usize = 64;

/// A parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Request target exactly as received
    pub target: String,
    /// Decoded, normalized name relative to the serving root ("" is the root)
    pub path: String,
    /// Whether the raw path ended with `/`
    pub trailing_slash: bool,
    pub query: Option<String>,
    pub version: Version,
    pub headers: HeaderList,
    pub range: Option<ByteRange>,
    /// Whether the connection stays open after the response
    pub keep_alive: bool,
    /// Declared body size, read and discarded by the session
    pub body_length: u64,
}

impl Request {
    /// Whether the query string contains `flag` as one of its `&`-separated
    /// components, e.g. `mode=hls`.
    pub fn has_query_flag(&self, flag: &str) -> bool {
        self.query
            .as_deref()
            .is_some_and(|query| query.split('&').any(|part| part == flag))
    }
}

/// Offset just past the `\r\n\r\n` that ends a request head.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|position| position + 4)
}

/// Parse a complete request head (request line, headers, blank line).
///
/// # Errors
///
/// - `ProtocolError::NotUtf8` - The head contains invalid UTF-8
/// - `ProtocolError::MalformedRequestLine` - Not `METHOD SP TARGET SP VERSION`
/// - `ProtocolError::UnsupportedVersion` - Neither HTTP/1.0 nor HTTP/1.1
/// - `ProtocolError::MalformedHeader` - A header line that is not `name: value`
/// - `ProtocolError::TooManyHeaders` - More than [`MAX_HEADERS`] header lines
/// - `ProtocolError::UnsupportedMethod` - Anything but `GET`
/// - `ProtocolError::InvalidTarget` - Target is not an absolute path or decodes to invalid UTF-8
/// - `ProtocolError::MalformedRange` - Unparseable `Range` value
/// - `ProtocolError::InvalidContentLength` - Non-numeric `Content-Length`
pub fn parse_request(head: &[u8]) -> Result<Request, ProtocolError> {
    let text = std::str::from_utf8(head).map_err(|_| ProtocolError::NotUtf8)?;
    let request_line = text.lines().next().unwrap_or_default();

    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut header_storage);
    let malformed = || ProtocolError::MalformedRequestLine {
        line: request_line.to_string(),
    };
    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(malformed()),
        Err(e) => return Err(parse_error(e, text, request_line)),
    }

    let (Some(method), Some(target), Some(minor)) = (parsed.method, parsed.path, parsed.version)
    else {
        return Err(malformed());
    };
    let version = match minor {
        0 => Version::Http10,
        1 => Version::Http11,
        other => {
            return Err(ProtocolError::UnsupportedVersion {
                version: format!("HTTP/1.{other}"),
            });
        }
    };
    if method != "GET" {
        return Err(ProtocolError::UnsupportedMethod {
            method: method.to_string(),
        });
    }

    let (raw_path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (target, None),
    };
    if !raw_path.starts_with('/') {
        return Err(ProtocolError::InvalidTarget {
            target: target.to_string(),
        });
    }
    let decoded = urlencoding::decode(raw_path).map_err(|_| ProtocolError::InvalidTarget {
        target: target.to_string(),
    })?;

    let mut headers = HeaderList::new();
    for header in parsed.headers.iter() {
        let value = std::str::from_utf8(header.value).map_err(|_| ProtocolError::NotUtf8)?;
        headers.append(header.name, value.trim());
    }

    let range = headers.get("range").map(ByteRange::parse).transpose()?;
    let body_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<u64>()
            .map_err(|_| ProtocolError::InvalidContentLength {
                value: value.to_string(),
            })?,
        None => 0,
    };
    let keep_alive = match version {
        Version::Http11 => !headers.has_token("connection", "close"),
        Version::Http10 => false,
    };

    Ok(Request {
        method: method.to_string(),
        target: target.to_string(),
        path: paths::normalize(&decoded),
        trailing_slash: decoded.ends_with('/'),
        query,
        version,
        headers,
        range,
        keep_alive,
        body_length,
    })
}

/// Translate a parser failure into the error reported to the client.
fn parse_error(error: httparse::Error, head: &str, request_line: &str) -> ProtocolError {
    match error {
        httparse::Error::Version => ProtocolError::UnsupportedVersion {
            version: request_line
                .rsplit(' ')
                .next()
                .unwrap_or_default()
                .to_string(),
        },
        httparse::Error::HeaderName | httparse::Error::HeaderValue => {
            // httparse does not say which line; report the first one without a colon.
            let line = head
                .lines()
                .skip(1)
                .find(|line| !line.is_empty() && !line.contains(':'))
                .unwrap_or_default();
            ProtocolError::MalformedHeader {
                line: line.to_string(),
            }
        }
        httparse::Error::TooManyHeaders => ProtocolError::TooManyHeaders { limit: MAX_HEADERS },
        _ => ProtocolError::MalformedRequestLine {
            line: request_line.to_string(),
        },
    }
}
