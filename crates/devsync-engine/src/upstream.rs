//! Upstream pipeline: local changes → remote filesystem
//!
//! Consumes debounced batches of [`LocalEvent`]s, decides per path with
//! [`should_upload`] / [`should_remove_remote`], and executes transfers:
//! directory creations and remote deletions sequentially (cheap, and
//! ordering matters), file uploads through a bounded worker pool.
//!
//! Every path's decide → transfer → commit sequence runs while holding that
//! path's lock from [`PathLocks`], and the decision itself re-reads the
//! index inside the critical section, so a downstream commit that lands
//! after batch assembly is always observed.
//!
//! Index commits happen only after the transport acknowledged the transfer.
//! Transport errors abort the batch and surface as session-fatal; local I/O
//! errors skip the affected path, emit a [`SessionEvent::FileError`] and
//! leave it for a later cycle.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use devsync_core::domain::{FileRecord, RelativePath, SessionEvent};
use devsync_core::ports::{ILocalFileSystem, IRemoteChannel, TransportError};

use crate::evaluate::{should_remove_remote, should_upload};
use crate::ignore::Matchers;
use crate::index::{FileIndex, PathLocks};
use crate::throttle::BandwidthLimiter;
use crate::watcher::LocalEvent;
use crate::SyncError;

/// Counters for one processed upstream batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpstreamStats {
    /// Files and directories pushed to the remote side
    pub uploaded: u64,
    /// Paths deleted on the remote side
    pub removed: u64,
    /// Paths skipped by a decision predicate or a transient error
    pub skipped: u64,
}

/// The upstream half of the sync engine.
///
/// Cheap to clone; all heavy state is shared behind `Arc`s.
#[derive(Clone)]
pub struct Upstream {
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

impl Upstream {
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

    /// Process one batch of local events.
    ///
    /// `is_initial_pass` selects the initial-reconciliation comparison in
    /// [`should_upload`].
    #[instrument(skip(self, events), fields(batch = events.len(), initial = is_initial_pass))]
    pub async fn apply_batch(
        &self,
        events: Vec<LocalEvent>,
        is_initial_pass: bool,
    ) -> Result<UpstreamStats, SyncError> {
        let mut stats = UpstreamStats::default();

        // Resolve absolute event paths to index keys; events outside the
        // root or with undecodable names are dropped here.
        let mut candidates: Vec<RelativePath> = Vec::with_capacity(events.len());
        for event in &events {
            if event.path() == self.local_root {
                continue;
            }
            match RelativePath::from_absolute(event.path(), &self.local_root) {
                Ok(rel) => candidates.push(rel),
                Err(err) => {
                    debug!(path = %event.path().display(), %err, "dropping event outside sync root");
                }
            }
        }
        candidates.sort();
        candidates.dedup();

        // A fresh stat decides each path's fate: present → upload
        // candidate, absent → remote-deletion candidate.
        let mut uploads: Vec<(RelativePath, FileRecord)> = Vec::new();
        let mut removals: Vec<RelativePath> = Vec::new();
        for path in candidates {
            let abs = path.to_absolute(&self.local_root);
            match self.fs.stat(&abs).await {
                Ok(Some(stat)) => uploads.push((path, stat)),
                Ok(None) => removals.push(path),
                Err(err) => {
                    self.report_file_error(&path, &err.to_string()).await;
                    stats.skipped += 1;
                }
            }
        }

        // Directories first, parents before children, sequentially: remote
        // directory creation is cheap and later file uploads depend on it.
        let mut dirs: Vec<(RelativePath, FileRecord)> = Vec::new();
        let mut files: Vec<RelativePath> = Vec::new();
        for (path, stat) in uploads {
            if stat.is_directory {
                dirs.push((path, stat));
            } else {
                files.push(path);
            }
        }
        dirs.sort_by_key(|(path, _)| path.depth());

        for (path, stat) in dirs {
            match self.create_remote_directory(&path, &stat, is_initial_pass).await? {
                true => stats.uploaded += 1,
                false => stats.skipped += 1,
            }
        }

        // File uploads run concurrently, bounded by the worker semaphore.
        let mut tasks: JoinSet<Result<bool, TransportError>> = JoinSet::new();
        for path in files {
            let pipeline = self.clone();
            tasks.spawn(async move { pipeline.upload_file(path, is_initial_pass).await });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(true)) => stats.uploaded += 1,
                Ok(Ok(false)) => stats.skipped += 1,
                Ok(Err(transport)) => {
                    tasks.abort_all();
                    return Err(transport.into());
                }
                Err(join_err) => {
                    warn!(error = %join_err, "upload worker panicked");
                    stats.skipped += 1;
                }
            }
        }

        // Remote deletions last, children before parents.
        removals.sort_by_key(|path| std::cmp::Reverse(path.depth()));
        for path in removals {
            match self.remove_remote(&path).await? {
                true => stats.removed += 1,
                false => stats.skipped += 1,
            }
        }

        debug!(?stats, "upstream batch complete");
        Ok(stats)
    }

    /// Create one directory remotely and commit it, if the predicate agrees.
    async fn create_remote_directory(
        &self,
        path: &RelativePath,
        stat: &FileRecord,
        is_initial_pass: bool,
    ) -> Result<bool, SyncError> {
        let _guard = self.locks.acquire(path).await;

        let wanted = self
            .index
            .read(|map| should_upload(map, &self.matchers, path, Some(stat), is_initial_pass))
            .await;
        if !wanted {
            return Ok(false);
        }

        match self.remote.create_directory(path, stat.mtime).await {
            Ok(()) => {}
            Err(err) if !err.is_fatal() => {
                self.report_file_error(path, &err.to_string()).await;
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }

        let record = FileRecord::directory(stat.mtime);
        self.index
            .transaction(|map| map.insert(path.clone(), record))
            .await;
        debug!(%path, "remote directory created");
        Ok(true)
    }

    /// Upload one file: lock, re-decide, read, throttle, send, commit.
    ///
    /// Returns `Ok(true)` on a committed transfer, `Ok(false)` on a skip.
    async fn upload_file(
        &self,
        path: RelativePath,
        is_initial_pass: bool,
    ) -> Result<bool, TransportError> {
        let _guard = self.locks.acquire(&path).await;
        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .expect("upload semaphore closed");

        let abs = path.to_absolute(&self.local_root);

        // Fresh stat under the path lock: the batch-time stat may predate a
        // transfer that just finished for this path.
        let stat = match self.fs.stat(&abs).await {
            Ok(Some(stat)) => stat,
            Ok(None) => {
                debug!(%path, "file vanished before upload, leaving for next cycle");
                return Ok(false);
            }
            Err(err) => {
                self.report_file_error(&path, &err.to_string()).await;
                return Ok(false);
            }
        };

        let wanted = self
            .index
            .read(|map| should_upload(map, &self.matchers, &path, Some(&stat), is_initial_pass))
            .await;
        if !wanted {
            return Ok(false);
        }

        let data = match self.fs.read_file(&abs).await {
            Ok(data) => data,
            Err(err) => {
                self.report_file_error(&path, &err.to_string()).await;
                return Ok(false);
            }
        };

        self.limiter.throttle(data.len() as u64).await;
        match self.remote.upload(&path, stat.mtime, data).await {
            Ok(()) => {}
            Err(err) if !err.is_fatal() => {
                self.report_file_error(&path, &err.to_string()).await;
                return Ok(false);
            }
            Err(err) => return Err(err),
        }

        // Commit the metadata the decision was made on; if the file changed
        // underneath us the next stat won't match and the path re-uploads.
        let record = FileRecord::file(stat.mtime, stat.size);
        self.index
            .transaction(|map| map.insert(path.clone(), record))
            .await;
        debug!(%path, mtime = stat.mtime, size = stat.size, "upload committed");
        Ok(true)
    }

    /// Delete one path remotely, if the predicate agrees.
    async fn remove_remote(&self, path: &RelativePath) -> Result<bool, SyncError> {
        let _guard = self.locks.acquire(path).await;

        let wanted = self
            .index
            .read(|map| should_remove_remote(map, &self.matchers, path))
            .await;
        if !wanted {
            return Ok(false);
        }

        match self.remote.delete(path).await {
            Ok(()) => {}
            Err(err) if !err.is_fatal() => {
                self.report_file_error(path, &err.to_string()).await;
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }

        // A directory delete takes its whole subtree with it remotely, so
        // the children's index entries go too.
        self.index
            .transaction(|map| {
                let was_dir = map.remove(path).map(|r| r.is_directory).unwrap_or(false);
                if was_dir {
                    map.retain(|tracked, _| !tracked.starts_with(path));
                }
            })
            .await;
        debug!(%path, "remote path removed");
        Ok(true)
    }

    async fn report_file_error(&self, path: &RelativePath, message: &str) {
        warn!(%path, message, "skipping path this cycle");
        let _ = self
            .status
            .send(SessionEvent::file_error(path.as_str(), message))
            .await;
    }
}
