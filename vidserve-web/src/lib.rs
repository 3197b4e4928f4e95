//! Vidserve Web - keep-alive HTTP/1.1 file server

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]
#![warn(clippy::too_many_lines)]
//!
//! Serves a directory tree with byte ranges and generated listings, and
//! hands `.mkv` files requested with `?mode=hls` to the transcode job
//! coordinator so they can be played in the browser.

pub mod http;
pub mod mime;
pub mod paths;
pub mod router;
pub mod server;
pub mod session;
pub mod templates;

// Re-export main types
pub use router::Router;
pub use server::{Server, run_server};
pub use session::{SessionLimits, run_session};
