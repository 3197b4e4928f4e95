//! CLI command implementations

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;
use tracing::info;
use vidserve_core::{JobCoordinator, JobState, VidserveConfig};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Serve a directory tree over HTTP
    Serve {
        /// Directory to serve (defaults to VIDSERVE_ROOT or the current directory)
        root: Option<PathBuf>,
        /// Host to bind to
        #[arg(long)]
        host: Option<IpAddr>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
        /// Maximum concurrent connections
        #[arg(long)]
        max_connections: Option<usize>,
        /// Maximum concurrent conversions
        #[arg(long)]
        max_jobs: Option<usize>,
        /// Seconds a keep-alive connection may idle (0 disables the limit)
        #[arg(long)]
        idle_timeout: Option<u64>,
        /// ffmpeg binary
        #[arg(long)]
        ffmpeg: Option<PathBuf>,
        /// ffprobe binary
        #[arg(long)]
        ffprobe: Option<PathBuf>,
    },
    /// Show the conversion state of a video file
    Status {
        /// Source video file
        file: PathBuf,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            root,
            host,
            port,
            max_connections,
            max_jobs,
            idle_timeout,
            ffmpeg,
            ffprobe,
        } => {
            let mut config = VidserveConfig::from_env().context("Invalid environment")?;
            if let Some(root) = root {
                config.server.root = root;
            }
            if let Some(host) = host {
                config.server.bind_address.set_ip(host);
            }
            if let Some(port) = port {
                config.server.bind_address.set_port(port);
            }
            if let Some(max) = max_connections {
                config.server.max_connections = max;
            }
            if let Some(jobs) = max_jobs {
                config.transcode.max_concurrent_jobs = jobs;
            }
            if let Some(secs) = idle_timeout {
                config.server.idle_timeout =
                    (secs > 0).then(|| std::time::Duration::from_secs(secs));
            }
            if let Some(path) = ffmpeg {
                config.transcode.ffmpeg_path = path;
            }
            if let Some(path) = ffprobe {
                config.transcode.ffprobe_path = path;
            }
            serve(config).await
        }
        Commands::Status { file } => show_status(file),
    }
}

async fn serve(config: VidserveConfig) -> anyhow::Result<()> {
    if !config.server.root.is_dir() {
        anyhow::bail!("{} is not a directory", config.server.root.display());
    }
    info!(
        "Starting vidserve (max {} connections, {} conversion jobs)",
        config.server.max_connections, config.transcode.max_concurrent_jobs
    );
    vidserve_web::run_server(config)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))
}

fn show_status(file: PathBuf) -> anyhow::Result<()> {
    let config = VidserveConfig::from_env().context("Invalid environment")?;
    let coordinator = JobCoordinator::with_ffmpeg(config.transcode);
    let layout = coordinator.layout(&file);

    let state = coordinator
        .status(&file)
        .with_context(|| format!("Failed to inspect {}", layout.output_dir().display()))?;
    match state {
        JobState::NotStarted => println!("{}: not converted", file.display()),
        JobState::Processing => println!("{}: conversion in progress", file.display()),
        JobState::Ready => println!(
            "{}: ready ({})",
            file.display(),
            layout.manifest_path().display()
        ),
        JobState::Failed(diagnostic) => println!("{}: {}", file.display(), diagnostic),
    }
    Ok(())
}
