//! `devsync sync` - run a sync session until interrupted
//!
//! Loads and validates the configuration, spawns the attach command (a
//! child process whose stdio carries the framed agent protocol), starts
//! the session and relays status events until Ctrl-C or a fatal failure.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use devsync_core::config::Config;
use devsync_core::domain::SessionEvent;
use devsync_engine::session::SyncSession;
use devsync_transport::RemoteChannel;

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Local directory to mirror (overrides the config file)
    #[arg(long)]
    local: Option<PathBuf>,

    /// Destination directory inside the remote container (overrides config)
    #[arg(long)]
    remote: Option<String>,

    /// Command that attaches to the remote endpoint, e.g.
    /// `--attach kubectl exec -i my-pod -- devsync-agent` (overrides config)
    #[arg(long = "attach", num_args = 1.., value_name = "CMD", allow_hyphen_values = true)]
    attach: Vec<String>,

    /// Do not block on the initial reconciliation
    #[arg(long)]
    no_wait: bool,

    /// Additional ignore patterns (gitignore syntax, repeatable)
    #[arg(long = "exclude", value_name = "PATTERN")]
    exclude: Vec<String>,
}

impl SyncCommand {
    pub async fn run(self, config_path: Option<PathBuf>) -> Result<()> {
        let path = config_path.unwrap_or_else(Config::default_path);
        let mut config = Config::load_or_default(&path);

        if let Some(local) = self.local {
            config.sync.local_root = local;
        }
        if let Some(remote) = self.remote {
            config.sync.remote_root = remote;
        }
        if !self.attach.is_empty() {
            config.transport.attach_command = self.attach;
        }
        if self.no_wait {
            config.sync.wait_for_initial_sync = false;
        }
        config.ignore.patterns.extend(self.exclude);

        let errors = config.validate();
        if !errors.is_empty() {
            for err in &errors {
                warn!(%err, "configuration error");
            }
            bail!("invalid configuration ({} error(s))", errors.len());
        }

        let (mut agent, channel) = attach_remote(&config)?;
        let mut handle = SyncSession::start(config, Arc::new(channel))
            .await
            .context("failed to start sync session")?;

        info!(session = %handle.id(), "sync session running, press Ctrl-C to stop");

        let mut fatal: Option<String> = None;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down");
                    break;
                }

                event = handle.next_event() => match event {
                    Some(SessionEvent::InitialSyncComplete { uploaded, downloaded }) => {
                        info!(uploaded, downloaded, "initial sync complete");
                    }
                    Some(SessionEvent::FileError { path, message, .. }) => {
                        warn!(%path, %message, "file skipped this cycle");
                    }
                    Some(SessionEvent::Fatal(message)) => {
                        fatal = Some(message);
                        break;
                    }
                    Some(SessionEvent::Stopped) | None => break,
                }
            }
        }

        handle.stop(fatal.clone()).await;
        if let Err(err) = agent.kill().await {
            warn!(error = %err, "attach command did not terminate cleanly");
        }

        match fatal {
            Some(message) => bail!("session failed: {message}"),
            None => Ok(()),
        }
    }
}

/// Spawn the attach command and wrap its stdio in a [`RemoteChannel`].
fn attach_remote(
    config: &Config,
) -> Result<(
    Child,
    RemoteChannel<tokio::io::Join<tokio::process::ChildStdout, tokio::process::ChildStdin>>,
)> {
    let argv = &config.transport.attach_command;
    info!(command = ?argv, "attaching to remote endpoint");

    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn attach command: {}", argv[0]))?;

    let stdin = child.stdin.take().context("attach command has no stdin")?;
    let stdout = child.stdout.take().context("attach command has no stdout")?;

    let stream = tokio::io::join(stdout, stdin);
    let channel = RemoteChannel::new(
        stream,
        Duration::from_secs(config.transport.request_timeout),
    );
    Ok((child, channel))
}
