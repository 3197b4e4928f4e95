//! On-disk job markers inside a source's output directory.
//!
//! `<source>.hls/.processing` exists while a worker owns the job,
//! `<source>.hls/error.txt` records why the last attempt failed, and
//! `<source>.hls/master.m3u8` marks a finished rendition.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;

/// Lock file present while a conversion is running.
pub const LOCK_FILE: &str = ".processing";
/// Failure diagnostic written when a conversion gives up.
pub const ERROR_FILE: &str = "error.txt";
/// HLS master playlist written by a successful conversion.
pub const MANIFEST_FILE: &str = "master.m3u8";

/// Paths belonging to one source file's conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLayout {
    source: PathBuf,
    output_dir: PathBuf,
}

impl JobLayout {
    /// Derive the layout for `source`; the output directory is the source
    /// path with `suffix` appended (`movie.mkv` + `.hls` = `movie.mkv.hls`).
    pub fn for_source(source: &Path, suffix: &str) -> Self {
        let mut dir = OsString::from(source.as_os_str());
        dir.push(suffix);
        Self {
            source: source.to_path_buf(),
            output_dir: PathBuf::from(dir),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn lock_path(&self) -> PathBuf {
        self.output_dir.join(LOCK_FILE)
    }

    pub fn error_path(&self) -> PathBuf {
        self.output_dir.join(ERROR_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILE)
    }

    /// Classify the output directory by the markers it holds.
    ///
    /// Markers are checked in priority order: lock, manifest, error marker.
    /// A directory (or stray file) carrying none of them is reported as
    /// [`MarkerState::Corrupt`].
    ///
    /// # Errors
    ///
    /// - `io::Error` - Metadata of the output directory could not be read
    pub fn inspect(&self) -> io::Result<MarkerState> {
        match std::fs::symlink_metadata(&self.output_dir) {
            Ok(meta) if !meta.is_dir() => return Ok(MarkerState::Corrupt),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(MarkerState::Absent),
            Err(e) => return Err(e),
        }

        let lock_path = self.lock_path();
        if let Ok(meta) = std::fs::metadata(&lock_path) {
            let marker = std::fs::read_to_string(&lock_path)
                .ok()
                .and_then(|raw| LockMarker::parse(&raw));
            return Ok(MarkerState::Locked {
                marker,
                modified: meta.modified().ok(),
            });
        }

        if self.manifest_path().is_file() {
            return Ok(MarkerState::Ready);
        }

        match std::fs::read_to_string(self.error_path()) {
            Ok(diagnostic) => return Ok(MarkerState::Failed(diagnostic.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Ok(MarkerState::Failed(format!("unreadable error marker: {e}"))),
        }

        Ok(MarkerState::Corrupt)
    }

    /// Create the output directory and claim the job with an exclusive lock.
    ///
    /// Returns `Ok(false)` when another process already holds the lock.
    ///
    /// # Errors
    ///
    /// - `io::Error` - The directory or lock file could not be created
    pub fn try_create_lock(&self, marker: &LockMarker) -> io::Result<bool> {
        std::fs::create_dir_all(&self.output_dir)?;
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path())
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e),
        };
        file.write_all(marker.render().as_bytes())?;
        Ok(true)
    }

    /// Rewrite the heartbeat of an existing lock.
    ///
    /// Never creates the lock: once it is gone the job is no longer ours.
    ///
    /// # Errors
    ///
    /// - `io::Error` - The lock is missing or not writable
    pub async fn refresh_lock(&self, marker: &LockMarker) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.lock_path())
            .await?;
        file.write_all(marker.render().as_bytes()).await?;
        file.flush().await
    }

    /// Remove the lock; a lock that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// - `io::Error` - The lock exists but could not be removed
    pub async fn release_lock(&self) -> io::Result<()> {
        match tokio::fs::remove_file(self.lock_path()).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Persist a failure diagnostic for later requests.
    ///
    /// # Errors
    ///
    /// - `io::Error` - The marker could not be written
    pub async fn write_error(&self, diagnostic: &str) -> io::Result<()> {
        tokio::fs::write(self.error_path(), format!("Failed: {diagnostic}\n")).await
    }

    /// Delete everything in the output directory except the lock.
    ///
    /// Used between attempts so a failed run cannot leave a manifest behind.
    ///
    /// # Errors
    ///
    /// - `io::Error` - The directory could not be listed or an entry removed
    pub async fn remove_artifacts(&self) -> io::Result<()> {
        let mut entries = tokio::fs::read_dir(&self.output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() == LOCK_FILE {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    /// Delete the output directory and everything in it.
    ///
    /// # Errors
    ///
    /// - `io::Error` - Removal failed for a reason other than the path being gone
    pub fn clear(&self) -> io::Result<()> {
        let result = match std::fs::symlink_metadata(&self.output_dir) {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&self.output_dir),
            Ok(_) => std::fs::remove_file(&self.output_dir),
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// What the output directory says about a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerState {
    /// No output directory at all
    Absent,
    /// A lock is present; `marker` is `None` when its contents are unreadable
    Locked {
        marker: Option<LockMarker>,
        modified: Option<SystemTime>,
    },
    /// The master manifest exists
    Ready,
    /// The error marker exists, with its diagnostic
    Failed(String),
    /// The directory exists without any marker
    Corrupt,
}

impl MarkerState {
    /// Decide whether a lock belongs to a worker that is still alive.
    ///
    /// Callers consult their own job table first, so a lock carrying this
    /// process's pid is an orphan. Foreign locks are live while their
    /// heartbeat (or, for unparseable locks, their mtime) is younger than
    /// `stale_after`.
    pub fn lock_is_live(&self, own_pid: u32, now: SystemTime, stale_after: Duration) -> bool {
        let MarkerState::Locked { marker, modified } = self else {
            return false;
        };

        let last_beat = match marker {
            Some(marker) if marker.pid == own_pid => return false,
            Some(marker) => Some(marker.heartbeat_time()),
            None => *modified,
        };

        match last_beat {
            // Clock skew into the future counts as fresh.
            Some(beat) => now.duration_since(beat).unwrap_or(Duration::ZERO) < stale_after,
            None => false,
        }
    }
}

/// Contents of the lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockMarker {
    /// Process that owns the job
    pub pid: u32,
    /// Last heartbeat, seconds since the Unix epoch
    pub heartbeat: u64,
}

impl LockMarker {
    /// A marker for this process stamped with the current time.
    pub fn current() -> Self {
        Self::at(std::process::id(), SystemTime::now())
    }

    pub fn at(pid: u32, when: SystemTime) -> Self {
        let heartbeat = when
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self { pid, heartbeat }
    }

    pub fn heartbeat_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.heartbeat)
    }

    pub fn render(&self) -> String {
        format!("pid={}\nheartbeat={}\n", self.pid, self.heartbeat)
    }

    /// Parse `key=value` lines; unknown keys are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut pid = None;
        let mut heartbeat = None;
        for line in raw.lines() {
            match line.trim().split_once('=') {
                Some(("pid", value)) => pid = value.trim().parse().ok(),
                Some(("heartbeat", value)) => heartbeat = value.trim().parse().ok(),
                _ => {}
            }
        }
        Some(Self {
            pid: pid?,
            heartbeat: heartbeat?,
        })
    }
}
