//! Minimal HTTP/1.x wire handling: request heads, ranges and responses.

pub mod headers;
pub mod range;
pub mod request;
pub mod response;

pub use headers::HeaderList;
pub use range::{ByteRange, ResolvedRange};
pub use request::{Request, Version, find_head_end, parse_request};
pub use response::{Body, Response};

/// Client mistakes that end the connection with `400 Bad Request`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("Request head is not valid UTF-8")]
    NotUtf8,

    #[error("Malformed request line: {line:?}")]
    MalformedRequestLine { line: String },

    #[error("Malformed header line: {line:?}")]
    MalformedHeader { line: String },

    #[error("More than {limit} header lines")]
    TooManyHeaders { limit: usize },

    #[error("Unsupported protocol version: {version}")]
    UnsupportedVersion { version: String },

    #[error("Unsupported method: {method}")]
    UnsupportedMethod { method: String },

    #[error("Invalid request target: {target:?}")]
    InvalidTarget { target: String },

    #[error("Malformed Range header: {value:?}")]
    MalformedRange { value: String },

    #[error("Range {value:?} cannot be satisfied for a {size}-byte file")]
    UnsatisfiableRange { value: String, size: u64 },

    #[error("Invalid Content-Length: {value:?}")]
    InvalidContentLength { value: String },
}
