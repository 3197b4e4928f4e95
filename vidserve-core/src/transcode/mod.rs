//! On-demand HLS conversion of video containers.
//!
//! A [`JobCoordinator`] owns the conversion of each source file into a
//! sibling `<source>.hls/` directory. Job state lives in two places: an
//! in-process table that serializes decisions inside one server, and marker
//! files inside the output directory that let a restarted server pick up
//! where the previous one stopped.

pub mod coordinator;
pub mod markers;
pub mod prober;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;
pub mod tracks;
pub mod transcoder;

use std::path::PathBuf;

pub use coordinator::{JobCoordinator, JobOutcome, JobState};
pub use markers::{JobLayout, LockMarker, MarkerState};
pub use prober::{FfprobeProber, MediaProber, ProbeReport, StreamTags};
pub use tracks::{TrackInfo, TrackLabel};
pub use transcoder::{FfmpegTranscoder, Transcoder};

/// Failures of a single conversion job.
///
/// Every variant ends up in the job's error marker, so `Display` output is
/// what a client eventually sees on the failure page.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranscodeError {
    #[error("Media probe failed for {path}: {reason}")]
    ProbeFailed { path: PathBuf, reason: String },

    #[error("No video stream found in {path}")]
    NoVideoStream { path: PathBuf },

    #[error("Failed to launch {tool}: {reason}")]
    SpawnFailed { tool: String, reason: String },

    #[error("{tool} exited with {status}: {stderr_tail}")]
    ProcessFailed {
        tool: String,
        status: String,
        stderr_tail: String,
    },

    #[error("Job marker I/O failed at {path}: {reason}")]
    MarkerIo { path: PathBuf, reason: String },

    #[error("Conversion worker aborted: {reason}")]
    WorkerAborted { reason: String },
}

impl TranscodeError {
    pub(crate) fn marker_io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        TranscodeError::MarkerIo {
            path: path.into(),
            reason: error.to_string(),
        }
    }
}

pub type TranscodeResult<T> = std::result::Result<T, TranscodeError>;
