//! devsync CLI - Command-line interface for devsync
//!
//! Provides the `devsync sync` command: attach to a remote endpoint and
//! keep a local directory mirrored into it until interrupted.
//!
//! Cluster/container selection, authentication and deployment live in
//! outer tooling; this binary only needs a command whose stdio speaks the
//! devsync agent protocol.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::sync::SyncCommand;

#[derive(Debug, Parser)]
#[command(name = "devsync", version, about = "Mirror a local directory into a remote container")]
pub struct Cli {
    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a bidirectional sync session
    Sync(SyncCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Sync(cmd) => cmd.run(cli.config).await,
    }
}
