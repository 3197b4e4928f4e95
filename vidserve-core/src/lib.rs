//! Vidserve Core - configuration, tracing and on-demand HLS conversion
//!
//! This crate holds everything the HTTP layer delegates to: the settings the
//! server runs with, the tracing subscriber, and the transcode job coordinator
//! that turns a video container into an HLS rendition exactly once per source.

pub mod config;
pub mod tracing_setup;
pub mod transcode;

pub use config::VidserveConfig;
pub use transcode::{
    FfmpegTranscoder, FfprobeProber, JobCoordinator, JobState, MediaProber, TranscodeError,
    Transcoder,
};

/// Errors that can bubble up from any vidserve subsystem.
#[derive(Debug, thiserror::Error)]
pub enum VidserveError {
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {reason}")]
    Server { reason: String },
}

impl VidserveError {
    /// Returns a short message suitable for printing to the terminal.
    pub fn user_message(&self) -> String {
        match self {
            VidserveError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            VidserveError::Transcode(_) => "Transcoding failed".to_string(),
            VidserveError::Io(e) => format!("File system error: {e}"),
            VidserveError::Server { reason } => format!("Server error: {reason}"),
        }
    }

    /// Checks if this error was caused by operator input.
    pub fn is_user_error(&self) -> bool {
        matches!(self, VidserveError::Configuration { .. })
    }

    /// Wrap any displayable server-side failure.
    pub fn from_server_error(error: impl std::fmt::Display) -> Self {
        VidserveError::Server {
            reason: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VidserveError>;
