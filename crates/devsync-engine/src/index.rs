//! Authoritative file-state index
//!
//! The [`FileIndex`] maps every synchronized relative path to the
//! [`FileRecord`] committed by the last successful transfer. It is the one
//! piece of mutable state shared between the collectors and both pipelines,
//! so every decide-then-mutate sequence runs inside a single exclusive
//! critical section obtained through [`FileIndex::transaction`]; decision-only
//! evaluations use the shared [`FileIndex::read`] view.
//!
//! Entries are created or updated only after a transfer or directory
//! creation succeeds, and removed only after a deletion was decided safe
//! *and* executed. Callers never hold record copies across a decision
//! boundary; they re-enter a critical section instead.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::debug;

use devsync_core::domain::{FileRecord, RelativePath};

/// The guarded map type. Exposed to the decision predicates, which take a
/// borrowed view of it inside a critical section.
pub type FileMap = HashMap<RelativePath, FileRecord>;

/// Mutex-guarded path → record map with closure-scoped access.
#[derive(Debug, Default)]
pub struct FileIndex {
    inner: RwLock<FileMap>,
}

impl FileIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index pre-populated from a map (restored snapshot).
    #[must_use]
    pub fn from_map(map: FileMap) -> Self {
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Run a read-only closure under the shared lock.
    pub async fn read<R>(&self, f: impl FnOnce(&FileMap) -> R) -> R {
        let guard = self.inner.read().await;
        f(&guard)
    }

    /// Run a decide-then-mutate closure under the exclusive lock.
    ///
    /// Everything that reads the index and then changes it based on what it
    /// read must happen inside one call, so no collector can decide against
    /// a value another worker is concurrently changing.
    pub async fn transaction<R>(&self, f: impl FnOnce(&mut FileMap) -> R) -> R {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }

    /// Look up a single record.
    pub async fn get(&self, path: &RelativePath) -> Option<FileRecord> {
        self.inner.read().await.get(path).copied()
    }

    /// Number of tracked paths.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// True when nothing is tracked yet.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    // ------------------------------------------------------------------
    // Snapshot persistence
    // ------------------------------------------------------------------

    /// Persist the current map as JSON at `path`.
    ///
    /// Written through a temp file + rename so a crash never leaves a
    /// truncated snapshot behind.
    pub async fn save(&self, path: &Path) -> anyhow::Result<()> {
        let map = self.inner.read().await.clone();
        let json = serde_json::to_vec_pretty(&map).context("serialize index snapshot")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("write index snapshot: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), entries = map.len(), "index snapshot saved");
        Ok(())
    }

    /// Restore an index from a JSON snapshot written by [`FileIndex::save`].
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read(path)
            .with_context(|| format!("read index snapshot: {}", path.display()))?;
        let map: FileMap = serde_json::from_slice(&content).context("parse index snapshot")?;
        debug!(path = %path.display(), entries = map.len(), "index snapshot restored");
        Ok(Self::from_map(map))
    }
}

// ============================================================================
// Per-path serialization
// ============================================================================

/// Per-path transfer locks.
///
/// Transfers for *different* paths run in parallel inside the worker pools;
/// transfers for the *same* path must not. A worker holds the path's lock
/// across decide → transfer → commit, so a second change to a path already
/// mid-transfer waits for the in-flight one and is re-evaluated against the
/// index that transfer committed. The upstream and downstream pipelines
/// share one instance, which also keeps their local filesystem access for a
/// given path from overlapping.
#[derive(Debug, Default)]
pub struct PathLocks {
    inner: std::sync::Mutex<HashMap<RelativePath, std::sync::Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `path`, waiting behind any in-flight transfer.
    pub async fn acquire(&self, path: &RelativePath) -> tokio::sync::OwnedMutexGuard<()> {
        let entry = {
            let mut table = self.inner.lock().expect("path lock table poisoned");
            table
                .entry(path.clone())
                .or_insert_with(|| std::sync::Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}
