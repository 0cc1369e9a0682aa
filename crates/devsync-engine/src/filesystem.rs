//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: write-to-temp + rename, so no observer (including
//!   our own watcher and the upstream walk) ever sees a partially-written
//!   file at the target path.
//! - **Explicit mtimes**: downloaded content lands on disk carrying the
//!   remote timestamp. The temp file's mtime is set *before* the rename,
//!   which keeps the timestamp the index commits equal to the one on disk.
//! - **Symlink-aware stat**: `stat` uses `symlink_metadata` so symlinks are
//!   reported as such instead of being followed.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing::{debug, instrument};

use devsync_core::domain::FileRecord;
use devsync_core::ports::ILocalFileSystem;

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// Zero-sized: all context comes from the path arguments. The sync root
/// lives at a higher layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    /// Create a new `LocalFileSystemAdapter`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Apply `mtime` (seconds since the epoch, clamped at 0) to a file.
fn set_file_mtime(path: &PathBuf, mtime: i64) -> std::io::Result<()> {
    let target = SystemTime::UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64);
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(target)
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn stat(&self, path: &Path) -> anyhow::Result<Option<FileRecord>> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => {
                let record = FileRecord::from_metadata(&meta)
                    .with_context(|| format!("mtime unavailable for {}", path.display()))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("stat {}", path.display())),
        }
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        debug!(bytes = data.len(), "file read complete");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(path = %path.display(), bytes = data.len()))]
    async fn write_file(&self, path: &Path, data: &[u8], mtime: i64) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create parent dirs for {}", path.display()))?;
        }

        // Temp file in the same directory so the rename stays on one
        // filesystem and is atomic.
        let tmp_path = {
            let mut p = path.as_os_str().to_owned();
            p.push(".devsync-tmp");
            PathBuf::from(p)
        };

        tokio::fs::write(&tmp_path, data)
            .await
            .with_context(|| format!("write temp file {}", tmp_path.display()))?;

        // Stamp the mtime on the temp file; after the rename the target
        // carries exactly the timestamp the caller will commit to the index.
        let stamp_path = tmp_path.clone();
        tokio::task::spawn_blocking(move || set_file_mtime(&stamp_path, mtime))
            .await
            .context("mtime task panicked")?
            .with_context(|| format!("set mtime on {}", tmp_path.display()))?;

        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("rename into place: {}", path.display()))?;

        debug!("write complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn create_directory(&self, path: &Path) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("create directory {}", path.display()))
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn remove(&self, path: &Path) -> anyhow::Result<()> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path already gone");
                return Ok(());
            }
            Err(e) => return Err(e).with_context(|| format!("stat before remove {}", path.display())),
        };

        if meta.is_dir() {
            debug!("removing directory recursively");
            tokio::fs::remove_dir_all(path).await?;
        } else {
            debug!("removing file");
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }
}
