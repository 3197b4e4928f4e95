//! Centralized configuration for vidserve.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the server and the transcode pipeline.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{Result, VidserveError};

/// Central configuration for all vidserve components.
///
/// Groups related settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct VidserveConfig {
    pub server: ServerConfig,
    pub transcode: TranscodeConfig,
}

/// Listener and connection handling configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_address: SocketAddr,
    /// Directory tree served to clients
    pub root: PathBuf,
    /// Maximum concurrently served connections; extra connections get 503
    pub max_connections: usize,
    /// Upper bound on the request line plus headers
    pub max_header_bytes: usize,
    /// How long a keep-alive connection may sit idle (None = forever)
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            root: PathBuf::from("."),
            max_connections: 256,
            max_header_bytes: 8192, // 8 KiB
            idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// On-demand HLS conversion configuration.
///
/// Controls which files are eligible for streaming mode, where the
/// external tools live, and how conversion jobs are supervised.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// File extension (without dot) eligible for streaming mode
    pub container_extension: String,
    /// Suffix appended to a source path to form its output directory
    pub output_suffix: String,
    /// ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// ffprobe binary
    pub ffprobe_path: PathBuf,
    /// Target HLS segment duration in seconds
    pub segment_seconds: u32,
    /// Maximum conversions running at the same time
    pub max_concurrent_jobs: usize,
    /// How often a running job rewrites its lock heartbeat
    pub heartbeat_interval: Duration,
    /// A foreign lock whose heartbeat is older than this is stale
    pub stale_lock_after: Duration,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            container_extension: "mkv".to_string(),
            output_suffix: ".hls".to_string(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            segment_seconds: 10,
            max_concurrent_jobs: 2,
            heartbeat_interval: Duration::from_secs(10),
            stale_lock_after: Duration::from_secs(30),
        }
    }
}

impl VidserveConfig {
    /// Load configuration with environment variable overrides.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// - `VidserveError::Configuration` - A variable is set but cannot be parsed
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = env_parse::<SocketAddr>("VIDSERVE_BIND")? {
            config.server.bind_address = addr;
        }
        if let Ok(root) = std::env::var("VIDSERVE_ROOT") {
            config.server.root = PathBuf::from(root);
        }
        if let Some(max) = env_parse::<usize>("VIDSERVE_MAX_CONNECTIONS")? {
            config.server.max_connections = max;
        }
        if let Some(bytes) = env_parse::<usize>("VIDSERVE_MAX_HEADER_BYTES")? {
            config.server.max_header_bytes = bytes;
        }
        if let Some(secs) = env_parse::<u64>("VIDSERVE_IDLE_TIMEOUT")? {
            config.server.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Ok(path) = std::env::var("VIDSERVE_FFMPEG") {
            config.transcode.ffmpeg_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("VIDSERVE_FFPROBE") {
            config.transcode.ffprobe_path = PathBuf::from(path);
        }
        if let Some(jobs) = env_parse::<usize>("VIDSERVE_MAX_JOBS")? {
            config.transcode.max_concurrent_jobs = jobs;
        }
        if let Some(secs) = env_parse::<u32>("VIDSERVE_SEGMENT_SECONDS")? {
            config.transcode.segment_seconds = secs;
        }

        config.validate()?;
        Ok(config)
    }

    /// Create configuration optimized for tests.
    ///
    /// Binds to an ephemeral loopback port and shortens every timer.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
                root: PathBuf::from("."),
                max_connections: 16,
                max_header_bytes: 8192,
                idle_timeout: Some(Duration::from_secs(5)),
            },
            transcode: TranscodeConfig {
                max_concurrent_jobs: 4,
                heartbeat_interval: Duration::from_millis(100),
                stale_lock_after: Duration::from_secs(2),
                ..TranscodeConfig::default()
            },
        }
    }

    /// Reject combinations the server cannot run with.
    ///
    /// # Errors
    ///
    /// - `VidserveError::Configuration` - A limit is zero or the timers are inconsistent
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(configuration("max_connections must be at least 1"));
        }
        if self.server.max_header_bytes < 16 {
            return Err(configuration("max_header_bytes is too small to hold a request line"));
        }
        if self.transcode.max_concurrent_jobs == 0 {
            return Err(configuration("max_concurrent_jobs must be at least 1"));
        }
        if self.transcode.segment_seconds == 0 {
            return Err(configuration("segment_seconds must be at least 1"));
        }
        if self.transcode.stale_lock_after <= self.transcode.heartbeat_interval {
            return Err(configuration(
                "stale_lock_after must be longer than heartbeat_interval",
            ));
        }
        Ok(())
    }
}

fn configuration(reason: &str) -> VidserveError {
    VidserveError::Configuration {
        reason: reason.to_string(),
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| VidserveError::Configuration {
                reason: format!("{name}={raw}: {e}"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VidserveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.max_header_bytes, 8192);
        assert_eq!(config.transcode.container_extension, "mkv");
        assert_eq!(config.transcode.output_suffix, ".hls");
    }

    #[test]
    fn test_testing_config_is_valid() {
        let config = VidserveConfig::for_testing();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_address.port(), 0);
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = VidserveConfig::default();
        config.server.max_connections = 0;
        assert!(matches!(
            config.validate(),
            Err(VidserveError::Configuration { .. })
        ));

        let mut config = VidserveConfig::default();
        config.transcode.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_staleness() {
        let mut config = VidserveConfig::default();
        config.transcode.stale_lock_after = config.transcode.heartbeat_interval;
        assert!(config.validate().is_err());
    }
}
