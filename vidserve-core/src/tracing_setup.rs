//! Log output for the vidserve binary.
//!
//! A server run is mostly quiet at `info` (listen address, job start and
//! finish), so the console gets the level picked with `--log-level` and only
//! for vidserve's own crates. The per-run file under `logs/` keeps every
//! vidserve event at trace plus warnings from dependencies, which is what
//! you want when an ffmpeg job failed overnight.

use std::fs::{File, create_dir_all};
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the file that receives the full trace of the current run.
pub const LOG_FILE_NAME: &str = "vidserve-last-run.log";

/// Used when no `--logs-dir` is given; relative to the working directory.
pub const DEFAULT_LOGS_DIR: &str = "logs";

const VIDSERVE_TARGETS: [&str; 3] = ["vidserve_core", "vidserve_web", "vidserve_cli"];

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Cannot create log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A global subscriber is already installed")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Where the per-run log lands for a given `--logs-dir`.
pub fn log_file_path(logs_dir: Option<&Path>) -> PathBuf {
    logs_dir
        .unwrap_or_else(|| Path::new(DEFAULT_LOGS_DIR))
        .join(LOG_FILE_NAME)
}

/// Filter directives: `dependencies` for everything, `ours` for vidserve crates.
fn directives(dependencies: Level, ours: Level) -> String {
    let mut directives = dependencies.as_str().to_ascii_lowercase();
    for target in VIDSERVE_TARGETS {
        directives.push_str(&format!(",{target}={}", ours.as_str().to_ascii_lowercase()));
    }
    directives
}

/// Install the global subscriber.
///
/// `RUST_LOG` replaces the console filter when set. The log file is
/// truncated on every start.
///
/// # Errors
///
/// - `LoggingError::LogFile` - The logs directory or file cannot be created
/// - `LoggingError::AlreadyInstalled` - Called twice in one process
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> Result<(), LoggingError> {
    let path = log_file_path(logs_dir);
    let log_file = path
        .parent()
        .map_or(Ok(()), create_dir_all)
        .and_then(|()| File::create(&path))
        .map_err(|source| LoggingError::LogFile {
            path: path.clone(),
            source,
        })?;

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(Level::WARN, console_level)));
    let console_layer = fmt::layer()
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new(directives(Level::WARN, Level::TRACE)));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!("Console at {}, full trace in {}", console_level, path.display());
    Ok(())
}

/// `--log-level` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    /// Lifecycle events such as listening and job completion
    #[default]
    Info,
    /// One line per request with its status
    Debug,
    Trace,
}

impl CliLogLevel {
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_tracing_level().as_str().to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_directives_scope_level_to_vidserve() {
        assert_eq!(
            directives(Level::WARN, Level::DEBUG),
            "warn,vidserve_core=debug,vidserve_web=debug,vidserve_cli=debug"
        );
        // Every directive must be accepted by the filter parser.
        assert!(EnvFilter::try_new(directives(Level::WARN, Level::TRACE)).is_ok());
    }

    #[test]
    fn test_log_file_path() {
        assert_eq!(
            log_file_path(None),
            Path::new("logs").join("vidserve-last-run.log")
        );
        assert_eq!(
            log_file_path(Some(Path::new("/var/log/vidserve"))),
            Path::new("/var/log/vidserve/vidserve-last-run.log")
        );
    }

    #[test]
    fn test_display_round_trips_through_clap() {
        use clap::ValueEnum;

        assert_eq!(CliLogLevel::default(), CliLogLevel::Info);
        for level in CliLogLevel::value_variants() {
            let parsed = CliLogLevel::from_str(&level.to_string(), true);
            assert_eq!(parsed.as_ref(), Ok(level));
        }
    }
}
