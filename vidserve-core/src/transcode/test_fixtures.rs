//! Scripted prober and transcoder for exercising the job coordinator
//! without ffmpeg installed.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::markers::MANIFEST_FILE;
use super::prober::{MediaProber, ProbeReport, StreamTags};
use super::tracks::TrackInfo;
use super::transcoder::Transcoder;
use super::{TranscodeError, TranscodeResult};

/// Prober returning a fixed report (or failure) and counting calls.
#[derive(Debug, Default)]
pub struct FakeProber {
    report: Option<ProbeReport>,
    calls: AtomicUsize,
}

impl FakeProber {
    /// One video stream, one English audio track, one English subtitle.
    pub fn with_subtitles() -> Self {
        Self::with_report(ProbeReport {
            video_count: 1,
            audio: vec![tag("eng")],
            subtitles: vec![tag("eng")],
        })
    }

    /// One video stream and one English audio track.
    pub fn video_and_audio() -> Self {
        Self::with_report(ProbeReport {
            video_count: 1,
            audio: vec![tag("eng")],
            subtitles: Vec::new(),
        })
    }

    pub fn with_report(report: ProbeReport) -> Self {
        Self {
            report: Some(report),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every probe fails, as for an unreadable file.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, path: &Path) -> TranscodeResult<ProbeReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.report.clone().ok_or_else(|| TranscodeError::ProbeFailed {
            path: path.to_path_buf(),
            reason: "scripted probe failure".to_string(),
        })
    }
}

/// How a [`FakeTranscoder`] attempt ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Write a manifest and a segment
    Succeed,
    /// Fail whenever subtitles are included, succeed otherwise
    FailWithSubtitles,
    /// Fail every attempt
    FailAlways,
    /// Report success without writing anything
    SucceedWithoutManifest,
}

/// Transcoder that sleeps, then writes a minimal HLS rendition.
#[derive(Debug)]
pub struct FakeTranscoder {
    behavior: FakeBehavior,
    delay: Duration,
    calls: AtomicUsize,
    subtitle_flags: Mutex<Vec<bool>>,
}

impl FakeTranscoder {
    pub fn new(behavior: FakeBehavior, delay: Duration) -> Self {
        Self {
            behavior,
            delay,
            calls: AtomicUsize::new(0),
            subtitle_flags: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(delay: Duration) -> Self {
        Self::new(FakeBehavior::Succeed, delay)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `include_subtitles` of every attempt, in call order.
    pub fn subtitle_flags(&self) -> Vec<bool> {
        self.subtitle_flags.lock().clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        _source: &Path,
        output_dir: &Path,
        _tracks: &TrackInfo,
        include_subtitles: bool,
    ) -> TranscodeResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.subtitle_flags.lock().push(include_subtitles);
        tokio::time::sleep(self.delay).await;

        let fail = match self.behavior {
            FakeBehavior::Succeed | FakeBehavior::SucceedWithoutManifest => false,
            FakeBehavior::FailWithSubtitles => include_subtitles,
            FakeBehavior::FailAlways => true,
        };
        if fail {
            // Leave a half-written playlist behind like an interrupted ffmpeg.
            let _ = tokio::fs::write(output_dir.join(MANIFEST_FILE), "#EXTM3U\n").await;
            return Err(TranscodeError::ProcessFailed {
                tool: "fake-ffmpeg".to_string(),
                status: "exit status: 1".to_string(),
                stderr_tail: "scripted failure".to_string(),
            });
        }
        if self.behavior == FakeBehavior::SucceedWithoutManifest {
            return Ok(());
        }

        tokio::fs::write(output_dir.join("segment_0_000.ts"), b"segment")
            .await
            .map_err(|e| TranscodeError::marker_io(output_dir, &e))?;
        tokio::fs::write(
            output_dir.join(MANIFEST_FILE),
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nstream_0.m3u8\n",
        )
        .await
        .map_err(|e| TranscodeError::marker_io(output_dir, &e))
    }
}

fn tag(language: &str) -> StreamTags {
    StreamTags {
        language: Some(language.to_string()),
    }
}

/// Temporary serving root holding `movie.mkv` (fake bytes) and `notes.txt`.
pub fn create_media_root() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let movie = dir.path().join("movie.mkv");
    std::fs::write(&movie, b"matroska bytes").expect("Failed to write movie");
    std::fs::write(dir.path().join("notes.txt"), b"hello").expect("Failed to write notes");
    (dir, movie)
}
