//! Local filesystem port (driven/secondary port)
//!
//! Interface for the engine's local disk access: symlink-aware stat, whole
//! file read/write, directory creation and removal.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific;
//!   the engine treats any local I/O error other than "not found" as
//!   retryable-and-loggable, never session-fatal.
//! - `stat` returns `Ok(None)` for missing paths instead of an error, so
//!   callers can tell "does not exist" apart from real failures.
//! - `write_file` takes an explicit target mtime: downstream transfers must
//!   land on disk with the remote timestamp so the index, the disk and the
//!   remote side agree on what was synchronized.

use std::path::Path;

use crate::domain::FileRecord;

/// Port trait for local filesystem operations.
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Stat a path without following symlinks.
    ///
    /// Returns `Ok(None)` when the path does not exist.
    async fn stat(&self, path: &Path) -> anyhow::Result<Option<FileRecord>>;

    /// Read the entire contents of a file.
    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>>;

    /// Atomically replace `path` with `data` and set its mtime.
    ///
    /// Parent directories are created as needed. The write must be atomic
    /// (no observer may see a partially-written file at `path`).
    async fn write_file(&self, path: &Path, data: &[u8], mtime: i64) -> anyhow::Result<()>;

    /// Create a directory and all missing parents.
    async fn create_directory(&self, path: &Path) -> anyhow::Result<()>;

    /// Remove a file, or a directory tree recursively.
    ///
    /// Removing a path that does not exist is not an error.
    async fn remove(&self, path: &Path) -> anyhow::Result<()>;
}
