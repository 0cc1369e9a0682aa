//! Sync session orchestration
//!
//! [`SyncSession::start`] validates the configuration once, builds the
//! index, matchers, limiters and pipelines, runs the initial
//! reconciliation, then spawns the two collector loops:
//!
//! - the **local loop** owns the filesystem watcher and the debounce queue
//!   and feeds settled batches into the upstream pipeline;
//! - the **remote loop** polls the remote change list on a fixed interval
//!   and feeds batches into the downstream pipeline.
//!
//! Both loops exit at their next check point when the shared
//! `CancellationToken` fires. Per-file errors are diagnostics on the status
//! channel; transport failures are fatal and force the session into
//! `Stopping`. In-flight transfers either complete and commit or abort
//! without touching the index.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use devsync_core::config::Config;
use devsync_core::domain::{SessionEvent, SessionId, SessionState};
use devsync_core::ports::{ILocalFileSystem, IRemoteChannel, TransportError};

use crate::downstream::Downstream;
use crate::filesystem::LocalFileSystemAdapter;
use crate::ignore::Matchers;
use crate::index::{FileIndex, PathLocks};
use crate::reconcile::initial_reconcile;
use crate::throttle::BandwidthLimiter;
use crate::upstream::Upstream;
use crate::watcher::{DebounceQueue, LocalWatcher};
use crate::SyncError;

/// Capacity of the status channel; overflow drops diagnostics, never blocks
/// a pipeline.
const STATUS_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// State handling
// ============================================================================

type SharedState = Arc<StdMutex<SessionState>>;

/// Advance the session state, ignoring (but logging) invalid transitions.
///
/// Concurrent failure paths can race to `Stopping`; the second attempt is a
/// harmless no-op.
fn advance(state: &SharedState, to: SessionState) {
    let mut guard = state.lock().expect("session state poisoned");
    if *guard == to {
        return;
    }
    match guard.transition_to(to) {
        Ok(next) => {
            debug!(state = %next, "session state changed");
            *guard = next;
        }
        Err(err) => warn!(%err, "ignoring invalid session state transition"),
    }
}

// ============================================================================
// Loop context
// ============================================================================

/// Everything the collector loops need, cheap to clone into tasks.
#[derive(Clone)]
struct LoopCtx {
    local_root: PathBuf,
    poll_interval: Duration,
    debounce: Duration,
    request_timeout: Duration,
    snapshot_path: Option<PathBuf>,
    index: Arc<FileIndex>,
    remote: Arc<dyn IRemoteChannel>,
    upstream: Upstream,
    downstream: Downstream,
    status: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
    state: SharedState,
}

impl LoopCtx {
    /// Escalate a fatal failure: emit the event, move to `Stopping`, cancel.
    fn fail(&self, message: String) {
        error!(message = %message, "session fatal failure");
        let _ = self.status.try_send(SessionEvent::Fatal(message));
        advance(&self.state, SessionState::Stopping);
        self.shutdown.cancel();
    }

    /// Persist the index snapshot when one is configured.
    async fn save_snapshot(&self) {
        if let Some(path) = &self.snapshot_path {
            if let Err(err) = self.index.save(path).await {
                warn!(error = %err, "index snapshot save failed");
            }
        }
    }
}

// ============================================================================
// SyncSession
// ============================================================================

/// Top-level constructor for a running sync session.
pub struct SyncSession;

impl SyncSession {
    /// Start a session against the real local filesystem.
    pub async fn start(
        config: Config,
        remote: Arc<dyn IRemoteChannel>,
    ) -> Result<SessionHandle, SyncError> {
        Self::start_with_filesystem(config, remote, Arc::new(LocalFileSystemAdapter::new())).await
    }

    /// Start a session with an explicit filesystem adapter.
    ///
    /// Validates the configuration, restores the index snapshot if one is
    /// configured, runs the initial reconciliation (blocking the call when
    /// `wait_for_initial_sync` is set) and spawns the collector loops.
    pub async fn start_with_filesystem(
        config: Config,
        remote: Arc<dyn IRemoteChannel>,
        fs: Arc<dyn ILocalFileSystem>,
    ) -> Result<SessionHandle, SyncError> {
        // Validate once, up front; decisions never re-probe the config.
        let validation = config.validate();
        if !validation.is_empty() {
            let joined: Vec<String> = validation.iter().map(ToString::to_string).collect();
            return Err(SyncError::InvalidConfig(joined.join("; ")));
        }

        let matchers = Arc::new(
            Matchers::new(&config.ignore.patterns, &config.ignore.upload_exclude)
                .map_err(|e| SyncError::InvalidConfig(e.to_string()))?,
        );

        let id = SessionId::new();
        // Canonical root: watcher events arrive with absolute paths, so
        // relative-path resolution must work against the same form.
        let local_root = config
            .sync
            .local_root
            .canonicalize()
            .unwrap_or_else(|_| config.sync.local_root.clone());
        info!(
            session = %id,
            local_root = %local_root.display(),
            remote_root = %config.sync.remote_root,
            "starting sync session"
        );

        let index = Arc::new(match &config.sync.index_snapshot {
            Some(path) if path.exists() => match FileIndex::load(path) {
                Ok(index) => index,
                Err(err) => {
                    warn!(error = %err, "index snapshot unreadable, starting empty");
                    FileIndex::new()
                }
            },
            _ => FileIndex::new(),
        });

        let locks = Arc::new(PathLocks::new());
        let (status_tx, status_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        let state: SharedState = Arc::new(StdMutex::new(SessionState::Initializing));
        let shutdown = CancellationToken::new();

        let upstream = Upstream::new(
            local_root.clone(),
            index.clone(),
            matchers.clone(),
            remote.clone(),
            fs.clone(),
            Arc::new(BandwidthLimiter::new(config.bandwidth.upload_kbps)),
            config.transfers.upload_workers,
            locks.clone(),
            status_tx.clone(),
        );
        let downstream = Downstream::new(
            local_root.clone(),
            index.clone(),
            matchers.clone(),
            remote.clone(),
            fs.clone(),
            Arc::new(BandwidthLimiter::new(config.bandwidth.download_kbps)),
            config.transfers.download_workers,
            locks.clone(),
            status_tx.clone(),
        );

        let ctx = LoopCtx {
            local_root,
            poll_interval: Duration::from_secs(config.sync.poll_interval),
            debounce: Duration::from_millis(config.sync.debounce_delay_ms),
            request_timeout: Duration::from_secs(config.transport.request_timeout),
            snapshot_path: config.sync.index_snapshot.clone(),
            index,
            remote,
            upstream,
            downstream,
            status: status_tx.clone(),
            shutdown: shutdown.clone(),
            state: state.clone(),
        };

        advance(&state, SessionState::InitialReconciling);

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        if config.sync.wait_for_initial_sync {
            // Blocking start: the caller gets a handle only once the trees
            // converged.
            match initial_reconcile(
                &ctx.local_root,
                ctx.remote.as_ref(),
                &ctx.upstream,
                &ctx.downstream,
                ctx.request_timeout,
            )
            .await
            {
                Ok(stats) => {
                    ctx.save_snapshot().await;
                    let _ = status_tx.try_send(SessionEvent::InitialSyncComplete {
                        uploaded: stats.uploaded,
                        downloaded: stats.downloaded,
                    });
                }
                Err(err) => {
                    advance(&state, SessionState::Stopping);
                    advance(&state, SessionState::Stopped);
                    return Err(err);
                }
            }
            advance(&state, SessionState::Watching);

            tasks.push(tokio::spawn(local_loop(ctx.clone())));
            tasks.push(tokio::spawn(remote_loop(ctx)));
        } else {
            // Background start: reconcile first, then enter steady state,
            // all inside one driver task.
            tasks.push(tokio::spawn(async move {
                match initial_reconcile(
                    &ctx.local_root,
                    ctx.remote.as_ref(),
                    &ctx.upstream,
                    &ctx.downstream,
                    ctx.request_timeout,
                )
                .await
                {
                    Ok(stats) => {
                        ctx.save_snapshot().await;
                        let _ = ctx.status.try_send(SessionEvent::InitialSyncComplete {
                            uploaded: stats.uploaded,
                            downloaded: stats.downloaded,
                        });
                    }
                    Err(err) => {
                        ctx.fail(format!("initial reconciliation failed: {err}"));
                        return;
                    }
                }
                advance(&ctx.state, SessionState::Watching);
                tokio::join!(local_loop(ctx.clone()), remote_loop(ctx.clone()));
            }));
        }

        Ok(SessionHandle {
            id,
            state,
            shutdown,
            status_rx,
            status_tx,
            tasks,
        })
    }
}

// ============================================================================
// Collector loops
// ============================================================================

/// Local collector: watcher events → debounce queue → upstream batches.
async fn local_loop(ctx: LoopCtx) {
    let (watcher, mut events) = match LocalWatcher::start(&ctx.local_root) {
        Ok(pair) => pair,
        Err(err) => {
            ctx.fail(format!("local watcher failed to start: {err}"));
            return;
        }
    };

    let mut queue = DebounceQueue::new(ctx.debounce);
    let mut tick = tokio::time::interval((ctx.debounce / 2).max(Duration::from_millis(50)));

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                // Flush whatever settled or not; a failed flush is moot,
                // the session is going away.
                let rest = queue.drain();
                if !rest.is_empty() {
                    debug!(pending = rest.len(), "flushing pending local events on shutdown");
                    let _ = ctx.upstream.apply_batch(rest, false).await;
                }
                break;
            }

            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => queue.push(event),
                    None => {
                        ctx.fail("local watcher channel closed".to_string());
                        break;
                    }
                }
            }

            _ = tick.tick() => {
                let batch = queue.poll();
                if batch.is_empty() {
                    continue;
                }
                match ctx.upstream.apply_batch(batch, false).await {
                    Ok(stats) => {
                        if stats.uploaded > 0 || stats.removed > 0 {
                            ctx.save_snapshot().await;
                        }
                    }
                    Err(err) => {
                        ctx.fail(format!("upstream pipeline failed: {err}"));
                        break;
                    }
                }
            }
        }
    }

    watcher.stop();
    debug!("local collector loop stopped");
}

/// Remote collector: periodic change-list polls → downstream batches.
async fn remote_loop(ctx: LoopCtx) {
    let mut tick = tokio::time::interval(ctx.poll_interval);
    // The immediate first tick would re-list straight after the initial
    // reconciliation; consume it.
    tick.tick().await;

    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,

            _ = tick.tick() => {
                let changes = match tokio::time::timeout(
                    ctx.request_timeout,
                    ctx.remote.list_changes(),
                )
                .await
                {
                    Err(_) => {
                        ctx.fail(TransportError::Timeout("change listing").to_string());
                        break;
                    }
                    Ok(Err(err)) => {
                        ctx.fail(format!("change listing failed: {err}"));
                        break;
                    }
                    Ok(Ok(changes)) => changes,
                };

                if changes.is_empty() {
                    continue;
                }
                match ctx.downstream.apply_changes(changes).await {
                    Ok(stats) => {
                        if stats.downloaded > 0 || stats.removed > 0 {
                            ctx.save_snapshot().await;
                        }
                    }
                    Err(err) => {
                        ctx.fail(format!("downstream pipeline failed: {err}"));
                        break;
                    }
                }
            }
        }
    }

    debug!("remote collector loop stopped");
}

// ============================================================================
// SessionHandle
// ============================================================================

/// Handle to a running session.
///
/// Exposes the status channel and the stop operation. Dropping the handle
/// without calling [`stop`](SessionHandle::stop) leaves the loops running
/// detached until the process exits; callers are expected to stop
/// explicitly.
pub struct SessionHandle {
    id: SessionId,
    state: SharedState,
    shutdown: CancellationToken,
    status_rx: mpsc::Receiver<SessionEvent>,
    status_tx: mpsc::Sender<SessionEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    /// This session's identifier.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state poisoned")
    }

    /// Receive the next status event.
    ///
    /// Returns `None` once the session stopped and the channel drained.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.status_rx.recv().await
    }

    /// Whether a fatal failure or stop request already fired.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop the session, waiting for the loops and in-flight transfers to
    /// wind down.
    ///
    /// `error` records the caller's reason when stopping in reaction to a
    /// failure; `None` is a normal shutdown.
    pub async fn stop(mut self, error: Option<String>) {
        match &error {
            Some(reason) => warn!(session = %self.id, reason = %reason, "stopping session after error"),
            None => info!(session = %self.id, "stopping session"),
        }

        advance(&self.state, SessionState::Stopping);
        self.shutdown.cancel();

        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(error = %err, "session task did not shut down cleanly");
            }
        }

        advance(&self.state, SessionState::Stopped);
        let _ = self.status_tx.try_send(SessionEvent::Stopped);
        info!(session = %self.id, "session stopped");
    }
}
