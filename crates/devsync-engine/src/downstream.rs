//! Downstream pipeline: remote changes → local filesystem
//!
//! Consumes batches of [`RemoteChange`]s from the remote collector, decides
//! per path with [`should_download`], and executes: directory creations
//! sequentially, file downloads through a bounded worker pool, and local
//! deletions last.
//!
//! Deletions are the dangerous half. Each one is queued together with a
//! [`PendingSnapshot`] (the tracked record copied at queue time) and
//! re-validated by [`should_remove_local`] immediately before execution, so
//! a file the user edited between decision and execution is never deleted.
//!
//! Index commits happen only after content is durably on disk. Ambiguous
//! deletion state always resolves toward not deleting.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use devsync_core::domain::{FileRecord, RelativePath, RemoteChange, SessionEvent};
use devsync_core::ports::{ILocalFileSystem, IRemoteChannel, TransportError};

use crate::evaluate::{should_download, should_remove_local};
use crate::ignore::Matchers;
use crate::index::{FileIndex, PathLocks};
use crate::throttle::BandwidthLimiter;
use crate::SyncError;

/// The tracked record copied when a local deletion is queued, carried to
/// execution time to detect races.
pub type PendingSnapshot = Option<FileRecord>;

/// Counters for one processed downstream batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownstreamStats {
    /// Files and directories materialized locally
    pub downloaded: u64,
    /// Paths deleted locally
    pub removed: u64,
    /// Paths skipped by a decision predicate or a transient error
    pub skipped: u64,
}

/// The downstream half of the sync engine.
///
/// Cheap to clone; all heavy state is shared behind `Arc`s.
#[derive(Clone)]
pub struct Downstream {
    local_root: PathBuf,
    index: Arc<FileIndex>,
    matchers: Arc<Matchers>,
    remote: Arc<dyn IRemoteChannel>,
    fs: Arc<dyn ILocalFileSystem>,
    limiter: Arc<BandwidthLimiter>,
    workers: Arc<Semaphore>,
    locks: Arc<PathLocks>,
    status: mpsc::Sender<SessionEvent>,
}

impl Downstream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_root: PathBuf,
        index: Arc<FileIndex>,
        matchers: Arc<Matchers>,
        remote: Arc<dyn IRemoteChannel>,
        fs: Arc<dyn ILocalFileSystem>,
        limiter: Arc<BandwidthLimiter>,
        worker_count: u32,
        locks: Arc<PathLocks>,
        status: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            local_root,
            index,
            matchers,
            remote,
            fs,
            limiter,
            workers: Arc::new(Semaphore::new(worker_count.max(1) as usize)),
            locks,
            status,
        }
    }

    /// Process one batch of remote changes.
    #[instrument(skip(self, changes), fields(batch = changes.len()))]
    pub async fn apply_changes(
        &self,
        changes: Vec<RemoteChange>,
    ) -> Result<DownstreamStats, SyncError> {
        let mut stats = DownstreamStats::default();

        // Queue deletions with their snapshots *now*: the snapshot must
        // reflect the index as it was when the deletion was decided, not as
        // it will be after this batch's transfers commit.
        let mut deletions: Vec<(RelativePath, PendingSnapshot)> = Vec::new();
        let mut dirs: Vec<RemoteChange> = Vec::new();
        let mut files: Vec<RemoteChange> = Vec::new();

        for change in changes {
            if change.is_delete {
                let snapshot = self.index.get(&change.path).await;
                deletions.push((change.path, snapshot));
                continue;
            }

            // Ignored paths never enter the index, so filtering observed
            // changes here keeps every later decision consistent.
            if self.matchers.ignore.matches(&change.path, change.is_directory) {
                stats.skipped += 1;
                continue;
            }

            if change.is_directory {
                dirs.push(change);
            } else {
                files.push(change);
            }
        }

        // Directories first, parents before children.
        dirs.sort_by_key(|c| c.path.depth());
        for change in dirs {
            match self.create_local_directory(&change).await {
                Ok(true) => stats.downloaded += 1,
                Ok(false) => stats.skipped += 1,
                Err(err) => return Err(err),
            }
        }

        // File downloads run concurrently, bounded by the worker semaphore.
        let mut tasks: JoinSet<Result<bool, TransportError>> = JoinSet::new();
        for change in files {
            let pipeline = self.clone();
            tasks.spawn(async move { pipeline.download_file(change).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(true)) => stats.downloaded += 1,
                Ok(Ok(false)) => stats.skipped += 1,
                Ok(Err(transport)) => {
                    tasks.abort_all();
                    return Err(transport.into());
                }
                Err(join_err) => {
                    warn!(error = %join_err, "download worker panicked");
                    stats.skipped += 1;
                }
            }
        }

        // Deletions last, children before parents.
        deletions.sort_by_key(|(path, _)| std::cmp::Reverse(path.depth()));
        for (path, snapshot) in deletions {
            if self.remove_local(&path, snapshot).await {
                stats.removed += 1;
            } else {
                stats.skipped += 1;
            }
        }

        debug!(?stats, "downstream batch complete");
        Ok(stats)
    }

    /// Create one directory locally and commit it, if the predicate agrees.
    async fn create_local_directory(&self, change: &RemoteChange) -> Result<bool, SyncError> {
        let _guard = self.locks.acquire(&change.path).await;

        let wanted = self.index.read(|map| should_download(map, change)).await;
        if !wanted {
            return Ok(false);
        }

        let abs = change.path.to_absolute(&self.local_root);
        if let Err(err) = self.fs.create_directory(&abs).await {
            self.report_file_error(&change.path, &err.to_string()).await;
            return Ok(false);
        }

        self.index
            .transaction(|map| map.insert(change.path.clone(), change.as_record()))
            .await;
        debug!(path = %change.path, "local directory created");
        Ok(true)
    }

    /// Download one file: lock, re-decide, fetch, throttle, write, commit.
    ///
    /// Returns `Ok(true)` on a committed transfer, `Ok(false)` on a skip.
    async fn download_file(&self, change: RemoteChange) -> Result<bool, TransportError> {
        let _guard = self.locks.acquire(&change.path).await;
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .expect("download semaphore closed");

        let wanted = self.index.read(|map| should_download(map, &change)).await;
        if !wanted {
            return Ok(false);
        }

        // Pace on the advertised size before pulling the content.
        self.limiter.throttle(change.size).await;

        let data = match self.remote.download(&change.path).await {
            Ok(data) => data,
            Err(err) if !err.is_fatal() => {
                // The file vanished remotely between listing and download;
                // a deletion notification will follow.
                self.report_file_error(&change.path, &err.to_string()).await;
                return Ok(false);
            }
            Err(err) => return Err(err),
        };

        let abs = change.path.to_absolute(&self.local_root);
        if let Err(err) = self.fs.write_file(&abs, &data, change.mtime).await {
            // Not committed: the path re-evaluates on the next cycle.
            self.report_file_error(&change.path, &err.to_string()).await;
            return Ok(false);
        }

        self.index
            .transaction(|map| map.insert(change.path.clone(), change.as_record()))
            .await;
        debug!(path = %change.path, mtime = change.mtime, size = change.size, "download committed");
        Ok(true)
    }

    /// Execute one queued local deletion, re-validating freshness first.
    ///
    /// Returns whether the path was deleted. Every skip is deliberate: the
    /// remote side will re-report the deletion if it still applies.
    async fn remove_local(&self, path: &RelativePath, snapshot: PendingSnapshot) -> bool {
        let _guard = self.locks.acquire(path).await;

        let abs = path.to_absolute(&self.local_root);
        let live = match self.fs.stat(&abs).await {
            Ok(live) => live,
            Err(err) => {
                // Unknown stat errors are unsafe ground for a deletion.
                self.report_file_error(path, &err.to_string()).await;
                return false;
            }
        };

        let safe = self
            .index
            .read(|map| should_remove_local(map, path, snapshot.as_ref(), live.as_ref()))
            .await;
        if !safe {
            return false;
        }

        if let Err(err) = self.fs.remove(&abs).await {
            self.report_file_error(path, &err.to_string()).await;
            return false;
        }

        // Entry removal strictly after successful execution; a directory
        // takes its subtree's entries with it.
        self.index
            .transaction(|map| {
                let was_dir = map.remove(path).map(|r| r.is_directory).unwrap_or(false);
                if was_dir {
                    map.retain(|tracked, _| !tracked.starts_with(path));
                }
            })
            .await;
        debug!(%path, "local path removed");
        true
    }

    async fn report_file_error(&self, path: &RelativePath, message: &str) {
        warn!(%path, message, "skipping path this cycle");
        let _ = self
            .status
            .send(SessionEvent::file_error(path.as_str(), message))
            .await;
    }
}
