//! HLS conversion backends.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;

use super::markers::MANIFEST_FILE;
use super::tracks::TrackInfo;
use super::{TranscodeError, TranscodeResult};

/// Stderr lines kept in a failure diagnostic.
const STDERR_TAIL_LINES: usize = 8;

/// Converts a source container into an HLS rendition.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Write the master manifest, variant playlists and segments into
    /// `output_dir`, which already exists.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::SpawnFailed` - The conversion tool could not be started
    /// - `TranscodeError::ProcessFailed` - The tool exited unsuccessfully
    async fn transcode(
        &self,
        source: &Path,
        output_dir: &Path,
        tracks: &TrackInfo,
        include_subtitles: bool,
    ) -> TranscodeResult<()>;
}

/// Transcoder that runs the `ffmpeg` CLI.
///
/// Video is copied, audio is re-encoded to AAC and subtitles to WebVTT.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    segment_seconds: u32,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: PathBuf, segment_seconds: u32) -> Self {
        Self {
            ffmpeg_path,
            segment_seconds,
        }
    }

    /// Full argument list for one conversion attempt.
    pub fn build_args(
        &self,
        source: &Path,
        output_dir: &Path,
        tracks: &TrackInfo,
        include_subtitles: bool,
    ) -> Vec<OsString> {
        let include_subtitles = include_subtitles && tracks.has_subtitles();
        let mut args: Vec<OsString> = vec!["-y".into(), "-v".into(), "error".into()];
        args.push("-i".into());
        args.push(source.into());
        args.extend(tracks.map_args(include_subtitles).into_iter().map(OsString::from));

        for arg in ["-c:v", "copy", "-c:a", "aac"] {
            args.push(arg.into());
        }
        if include_subtitles {
            args.push("-c:s".into());
            args.push("webvtt".into());
        }

        args.push("-f".into());
        args.push("hls".into());
        args.push("-hls_time".into());
        args.push(self.segment_seconds.to_string().into());
        for arg in [
            "-hls_list_size",
            "0",
            "-hls_playlist_type",
            "vod",
            "-hls_flags",
            "independent_segments",
        ] {
            args.push(arg.into());
        }
        args.push("-hls_segment_filename".into());
        args.push(output_dir.join("segment_%v_%03d.ts").into());
        args.push("-master_pl_name".into());
        args.push(MANIFEST_FILE.into());
        args.push("-var_stream_map".into());
        args.push(tracks.var_stream_map(include_subtitles).into());
        args.push(output_dir.join("stream_%v.m3u8").into());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        source: &Path,
        output_dir: &Path,
        tracks: &TrackInfo,
        include_subtitles: bool,
    ) -> TranscodeResult<()> {
        let start_time = Instant::now();
        let tool = self.ffmpeg_path.display().to_string();
        tracing::info!(
            "Starting HLS conversion: {} -> {} (subtitles: {})",
            source.display(),
            output_dir.display(),
            include_subtitles
        );

        let output = tokio::process::Command::new(&self.ffmpeg_path)
            .args(self.build_args(source, output_dir, tracks, include_subtitles))
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| TranscodeError::SpawnFailed {
                tool: tool.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TranscodeError::ProcessFailed {
                tool,
                status: output.status.to_string(),
                stderr_tail: stderr_tail(&output.stderr),
            });
        }

        tracing::info!(
            "HLS conversion of {} finished in {:.1}s",
            source.display(),
            start_time.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    if lines.is_empty() {
        "no diagnostic output".to_string()
    } else {
        lines[start..].join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::prober::{ProbeReport, StreamTags};

    fn tracks_with_subtitles() -> TrackInfo {
        let tag = |l: &str| StreamTags {
            language: Some(l.to_string()),
        };
        TrackInfo::from_report(&ProbeReport {
            video_count: 1,
            audio: vec![tag("eng")],
            subtitles: vec![tag("spa")],
        })
    }

    fn as_strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_args_with_subtitles() {
        let transcoder = FfmpegTranscoder::new(PathBuf::from("ffmpeg"), 10);
        let args = as_strings(transcoder.build_args(
            Path::new("/m/a.mkv"),
            Path::new("/m/a.mkv.hls"),
            &tracks_with_subtitles(),
            true,
        ));

        assert!(args.windows(2).any(|w| w == ["-i", "/m/a.mkv"]));
        assert!(args.windows(2).any(|w| w == ["-c:s", "webvtt"]));
        assert!(args.windows(2).any(|w| w == ["-map", "0:s:0"]));
        assert!(args.windows(2).any(|w| w == ["-hls_time", "10"]));
        assert!(args.windows(2).any(|w| w == ["-master_pl_name", "master.m3u8"]));
        assert!(
            args.windows(2)
                .any(|w| w == ["-hls_segment_filename", "/m/a.mkv.hls/segment_%v_%03d.ts"])
        );
        assert_eq!(args.last().map(String::as_str), Some("/m/a.mkv.hls/stream_%v.m3u8"));
    }

    #[test]
    fn test_args_without_subtitles() {
        let transcoder = FfmpegTranscoder::new(PathBuf::from("ffmpeg"), 6);
        let args = as_strings(transcoder.build_args(
            Path::new("a.mkv"),
            Path::new("a.mkv.hls"),
            &tracks_with_subtitles(),
            false,
        ));

        assert!(!args.iter().any(|a| a == "-c:s" || a == "0:s:0"));
        let map_position = args.iter().position(|a| a == "-var_stream_map").unwrap();
        assert_eq!(
            args[map_position + 1],
            "a:0,agroup:audio,language:eng,name:eng,default:yes v:0,agroup:audio"
        );
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..20).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert!(tail.starts_with("line 12"));
        assert!(tail.ends_with("line 19"));
        assert_eq!(stderr_tail(b""), "no diagnostic output");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let transcoder = FfmpegTranscoder::new(PathBuf::from("/nonexistent/ffmpeg-binary"), 10);
        let err = transcoder
            .transcode(
                Path::new("a.mkv"),
                Path::new("a.mkv.hls"),
                &TrackInfo::default(),
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::SpawnFailed { .. }));
    }
}
