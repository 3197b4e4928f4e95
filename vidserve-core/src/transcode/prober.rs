//! Media probing: counting a source's streams and reading their language tags.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use super::{TranscodeError, TranscodeResult};

/// Stream inventory of a media file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub video_count: usize,
    pub audio: Vec<StreamTags>,
    pub subtitles: Vec<StreamTags>,
}

/// Metadata tags of one audio or subtitle stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamTags {
    pub language: Option<String>,
}

/// Inspects a media file without modifying it.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Count the video streams and describe the audio and subtitle streams.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::ProbeFailed` - The file could not be opened or parsed
    /// - `TranscodeError::SpawnFailed` - The probing tool could not be started
    async fn probe(&self, path: &Path) -> TranscodeResult<ProbeReport>;
}

/// Prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> TranscodeResult<ProbeReport> {
        let output = tokio::process::Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_streams"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::SpawnFailed {
                tool: self.ffprobe_path.display().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TranscodeError::ProbeFailed {
                path: path.to_path_buf(),
                reason: format!("ffprobe exited with {}", output.status),
            });
        }

        parse_ffprobe_json(path, &output.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    #[serde(default)]
    tags: StreamTags,
}

/// Map `ffprobe -show_streams` JSON into a [`ProbeReport`].
///
/// Attached pictures and data streams are neither video nor tracks and are
/// skipped.
///
/// # Errors
///
/// - `TranscodeError::ProbeFailed` - The output is not valid ffprobe JSON
pub fn parse_ffprobe_json(path: &Path, json: &[u8]) -> TranscodeResult<ProbeReport> {
    let parsed: FfprobeOutput =
        serde_json::from_slice(json).map_err(|e| TranscodeError::ProbeFailed {
            path: path.to_path_buf(),
            reason: format!("ffprobe JSON parse error: {e}"),
        })?;

    let mut report = ProbeReport::default();
    for stream in parsed.streams {
        match stream.codec_type.as_deref() {
            Some("video") => report.video_count += 1,
            Some("audio") => report.audio.push(stream.tags),
            Some("subtitle") => report.subtitles.push(stream.tags),
            _ => {}
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264"},
            {"index": 1, "codec_type": "audio", "tags": {"language": "eng", "title": "Stereo"}},
            {"index": 2, "codec_type": "audio"},
            {"index": 3, "codec_type": "subtitle", "tags": {"language": "fre"}},
            {"index": 4, "codec_type": "attachment"}
        ]
    }"#;

    #[test]
    fn test_parse_counts_streams() {
        let report = parse_ffprobe_json(Path::new("a.mkv"), SAMPLE.as_bytes()).unwrap();
        assert_eq!(report.video_count, 1);
        assert_eq!(report.audio.len(), 2);
        assert_eq!(report.audio[0].language.as_deref(), Some("eng"));
        assert_eq!(report.audio[1].language, None);
        assert_eq!(report.subtitles[0].language.as_deref(), Some("fre"));
    }

    #[test]
    fn test_parse_empty_object() {
        let report = parse_ffprobe_json(Path::new("a.mkv"), b"{}").unwrap();
        assert_eq!(report, ProbeReport::default());
    }

    #[test]
    fn test_parse_garbage_is_probe_failure() {
        let err = parse_ffprobe_json(Path::new("a.mkv"), b"not json").unwrap_err();
        assert!(matches!(err, TranscodeError::ProbeFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let prober = FfprobeProber::new(PathBuf::from("/nonexistent/ffprobe-binary"));
        let err = prober.probe(Path::new("a.mkv")).await.unwrap_err();
        assert!(matches!(err, TranscodeError::SpawnFailed { .. }));
    }
}
