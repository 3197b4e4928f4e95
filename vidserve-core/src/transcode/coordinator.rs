//! Deduplicated, restart-safe HLS conversion jobs.
//!
//! The in-process job table is the mutual-exclusion device inside one
//! server: a request reserves the source's entry before touching the
//! markers, and the lock is only held for that check-and-insert. Exclusive
//! lock-file creation plus a heartbeat covers the case of a second server
//! (or a previous run) touching the same output directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::{Semaphore, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::markers::{JobLayout, LockMarker, MarkerState};
use super::prober::{FfprobeProber, MediaProber};
use super::tracks::TrackInfo;
use super::transcoder::{FfmpegTranscoder, Transcoder};
use super::{TranscodeError, TranscodeResult};
use crate::config::TranscodeConfig;

/// Conversion state of a source file as seen by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Nothing has been attempted yet
    NotStarted,
    /// A worker (here or in another process) is converting the file
    Processing,
    /// The master manifest is available
    Ready,
    /// The last attempt failed; carries the stored diagnostic
    Failed(String),
}

/// Final result published when a worker finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Ready,
    Failed(String),
}

struct ActiveJob {
    completion: watch::Receiver<Option<JobOutcome>>,
}

struct CoordinatorInner {
    config: TranscodeConfig,
    prober: Arc<dyn MediaProber>,
    transcoder: Arc<dyn Transcoder>,
    jobs: Mutex<HashMap<PathBuf, ActiveJob>>,
    permits: Semaphore,
}

/// Starts at most one conversion per source path and reports job state.
///
/// Cheap to clone; clones share the job table.
#[derive(Clone)]
pub struct JobCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl std::fmt::Debug for JobCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCoordinator")
            .field("active_jobs", &self.active_jobs())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl JobCoordinator {
    pub fn new(
        config: TranscodeConfig,
        prober: Arc<dyn MediaProber>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent_jobs.max(1));
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                prober,
                transcoder,
                jobs: Mutex::new(HashMap::new()),
                permits,
            }),
        }
    }

    /// Coordinator backed by the `ffprobe` and `ffmpeg` binaries from `config`.
    pub fn with_ffmpeg(config: TranscodeConfig) -> Self {
        let prober = Arc::new(FfprobeProber::new(config.ffprobe_path.clone()));
        let transcoder = Arc::new(FfmpegTranscoder::new(
            config.ffmpeg_path.clone(),
            config.segment_seconds,
        ));
        Self::new(config, prober, transcoder)
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.inner.config
    }

    /// Paths of the output directory and markers for `source`.
    pub fn layout(&self, source: &Path) -> JobLayout {
        JobLayout::for_source(source, &self.inner.config.output_suffix)
    }

    /// Number of workers owned by this process.
    pub fn active_jobs(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    /// Report the state of `source` without starting or repairing anything.
    ///
    /// Stale locks and corrupt directories are reported as `NotStarted`,
    /// which is what [`request`](Self::request) would turn them into.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::MarkerIo` - The output directory could not be inspected
    pub fn status(&self, source: &Path) -> TranscodeResult<JobState> {
        if self.inner.jobs.lock().contains_key(source) {
            return Ok(JobState::Processing);
        }
        let layout = self.layout(source);
        let markers = layout
            .inspect()
            .map_err(|e| TranscodeError::marker_io(layout.output_dir(), &e))?;
        let live = markers.lock_is_live(
            std::process::id(),
            SystemTime::now(),
            self.inner.config.stale_lock_after,
        );
        Ok(match markers {
            MarkerState::Locked { .. } if live => JobState::Processing,
            MarkerState::Ready => JobState::Ready,
            MarkerState::Failed(diagnostic) => JobState::Failed(diagnostic),
            _ => JobState::NotStarted,
        })
    }

    /// Handle a streaming-mode request for `source`.
    ///
    /// Returns `Ready` or `Failed` when the markers say so, otherwise makes
    /// sure exactly one worker is converting the file and returns
    /// `Processing`. Stale locks and marker-less directories are deleted
    /// and the job is restarted. A failed job is not retried.
    ///
    /// The job table entry for `source` is reserved before the markers are
    /// read, so concurrent requests for the same file report `Processing`
    /// while the filesystem work runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::MarkerIo` - Markers could not be read, removed or created
    /// - `TranscodeError::WorkerAborted` - The marker task panicked
    pub async fn request(&self, source: &Path) -> TranscodeResult<JobState> {
        let (completion_tx, completion_rx) = watch::channel(None);
        {
            let mut jobs = self.inner.jobs.lock();
            if jobs.contains_key(source) {
                return Ok(JobState::Processing);
            }
            jobs.insert(
                source.to_path_buf(),
                ActiveJob {
                    completion: completion_rx,
                },
            );
        }
        let reservation = Reservation {
            jobs: &self.inner.jobs,
            source,
            held: true,
        };

        let layout = self.layout(source);
        let claim = {
            let layout = layout.clone();
            let stale_after = self.inner.config.stale_lock_after;
            tokio::task::spawn_blocking(move || claim_output(&layout, stale_after))
                .await
                .map_err(|e| TranscodeError::WorkerAborted {
                    reason: e.to_string(),
                })?
        }?;

        match claim {
            Claim::Started => {
                reservation.keep();
                info!("Starting HLS conversion job for {}", source.display());
                self.spawn_supervisor(layout, completion_tx);
                Ok(JobState::Processing)
            }
            Claim::Existing(state) => Ok(state),
        }
    }

    /// Wait until this process's worker for `source` finishes.
    ///
    /// Returns `None` when no worker for `source` is running here.
    pub async fn wait_for_completion(&self, source: &Path) -> Option<JobOutcome> {
        let mut completion = self
            .inner
            .jobs
            .lock()
            .get(source)
            .map(|job| job.completion.clone())?;
        let outcome = completion.wait_for(Option::is_some).await.ok()?;
        outcome.clone()
    }

    /// Run the job on its own task and clean up however it ends, panics included.
    fn spawn_supervisor(&self, layout: JobLayout, completion: watch::Sender<Option<JobOutcome>>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let (stop_tx, stop_rx) = oneshot::channel();
            let heartbeat = spawn_heartbeat(layout.clone(), &inner.config, stop_rx);

            let job = tokio::spawn(run_job(Arc::clone(&inner), layout.clone()));
            let result = match job.await {
                Ok(result) => result,
                Err(e) => Err(TranscodeError::WorkerAborted {
                    reason: e.to_string(),
                }),
            };

            let _ = stop_tx.send(());
            let _ = heartbeat.await;

            let outcome = match result {
                Ok(()) => {
                    info!("HLS conversion ready: {}", layout.manifest_path().display());
                    JobOutcome::Ready
                }
                Err(e) => {
                    error!("HLS conversion of {} failed: {}", layout.source().display(), e);
                    let diagnostic = e.to_string();
                    if let Err(cleanup) = layout.remove_artifacts().await {
                        warn!("Failed to remove partial output: {}", cleanup);
                    }
                    if let Err(write) = layout.write_error(&diagnostic).await {
                        error!(
                            "Failed to write error marker in {}: {}",
                            layout.output_dir().display(),
                            write
                        );
                    }
                    JobOutcome::Failed(format!("Failed: {diagnostic}"))
                }
            };

            if let Err(e) = layout.release_lock().await {
                warn!("Failed to remove lock {}: {}", layout.lock_path().display(), e);
            }
            inner.jobs.lock().remove(layout.source());
            let _ = completion.send(Some(outcome));
        });
    }
}

/// Result of checking the markers for a request that owns the reservation.
enum Claim {
    /// The lock was created; a worker must be started
    Started,
    /// Nothing to start; report this state
    Existing(JobState),
}

/// A job table entry for a request that has not started a worker yet.
///
/// Dropping it removes the entry, so an early return or a cancelled
/// request never leaves a phantom job behind.
struct Reservation<'a> {
    jobs: &'a Mutex<HashMap<PathBuf, ActiveJob>>,
    source: &'a Path,
    held: bool,
}

impl Reservation<'_> {
    /// Hand the entry over to the supervisor, which removes it when done.
    fn keep(mut self) {
        self.held = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.held {
            self.jobs.lock().remove(self.source);
        }
    }
}

/// Inspect the markers, clear stale or corrupt output and try to take the
/// lock. Blocking; runs on the blocking pool.
fn claim_output(layout: &JobLayout, stale_after: Duration) -> TranscodeResult<Claim> {
    let marker_io = |e: std::io::Error| TranscodeError::marker_io(layout.output_dir(), &e);
    let source = layout.source();

    let markers = layout.inspect().map_err(marker_io)?;
    match markers {
        MarkerState::Locked { .. }
            if markers.lock_is_live(std::process::id(), SystemTime::now(), stale_after) =>
        {
            debug!("{} is locked by a live worker", source.display());
            return Ok(Claim::Existing(JobState::Processing));
        }
        MarkerState::Locked { .. } => {
            warn!(
                "Removing stale conversion lock in {}",
                layout.output_dir().display()
            );
            layout.clear().map_err(marker_io)?;
        }
        MarkerState::Ready => return Ok(Claim::Existing(JobState::Ready)),
        MarkerState::Failed(diagnostic) => return Ok(Claim::Existing(JobState::Failed(diagnostic))),
        MarkerState::Corrupt => {
            warn!(
                "Removing output directory without markers: {}",
                layout.output_dir().display()
            );
            layout.clear().map_err(marker_io)?;
        }
        MarkerState::Absent => {}
    }

    if !layout.try_create_lock(&LockMarker::current()).map_err(marker_io)? {
        debug!("Lost lock race for {}", source.display());
        return Ok(Claim::Existing(JobState::Processing));
    }
    Ok(Claim::Started)
}

/// Rewrite the lock's heartbeat until told to stop.
///
/// A refresh is never interrupted midway, so once this task has been joined
/// no write can resurrect a removed lock.
fn spawn_heartbeat(
    layout: JobLayout,
    config: &TranscodeConfig,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    let period = config.heartbeat_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    if let Err(e) = layout.refresh_lock(&LockMarker::current()).await {
                        warn!("Heartbeat for {} stopped: {}", layout.source().display(), e);
                        break;
                    }
                }
            }
        }
    })
}

async fn run_job(inner: Arc<CoordinatorInner>, layout: JobLayout) -> TranscodeResult<()> {
    let _permit = inner
        .permits
        .acquire()
        .await
        .map_err(|e| TranscodeError::WorkerAborted {
            reason: e.to_string(),
        })?;

    let source = layout.source();
    let output_dir = layout.output_dir();

    let report = inner.prober.probe(source).await?;
    if report.video_count == 0 {
        return Err(TranscodeError::NoVideoStream {
            path: source.to_path_buf(),
        });
    }
    let tracks = TrackInfo::from_report(&report);
    debug!(
        "{}: {} video, {} audio, {} subtitle streams",
        source.display(),
        tracks.video_count,
        tracks.audio.len(),
        tracks.subtitles.len()
    );

    if tracks.has_subtitles() {
        match inner
            .transcoder
            .transcode(source, output_dir, &tracks, true)
            .await
        {
            Ok(()) => return verify_manifest(&layout).await,
            Err(e) => {
                warn!(
                    "Conversion of {} with subtitles failed, retrying without: {}",
                    source.display(),
                    e
                );
                layout
                    .remove_artifacts()
                    .await
                    .map_err(|e| TranscodeError::marker_io(output_dir, &e))?;
            }
        }
    }

    inner
        .transcoder
        .transcode(source, output_dir, &tracks, false)
        .await?;
    verify_manifest(&layout).await
}

async fn verify_manifest(layout: &JobLayout) -> TranscodeResult<()> {
    let manifest = tokio::fs::metadata(layout.manifest_path()).await;
    if manifest.is_ok_and(|m| m.is_file()) {
        Ok(())
    } else {
        Err(TranscodeError::ProcessFailed {
            tool: "transcoder".to_string(),
            status: "success".to_string(),
            stderr_tail: "no master playlist was written".to_string(),
        })
    }
}
