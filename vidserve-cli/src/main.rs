//! Vidserve CLI - Command-line interface
//!
//! Starts the file server or inspects conversion state from the terminal.

mod commands;

use anyhow::Context;
use clap::Parser;
use vidserve_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "vidserve")]
#[command(about = "A file server with on-demand HLS streaming")]
struct Cli {
    /// Console log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for the per-run log file
    #[arg(long, global = true)]
    logs_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .context("Failed to initialize logging")?;

    commands::handle_command(cli.command).await?;

    Ok(())
}
