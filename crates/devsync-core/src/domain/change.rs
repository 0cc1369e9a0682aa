//! Remote change observations
//!
//! A [`RemoteChange`] describes one observation reported by the remote side
//! of the mirror. It is transient: produced by a change-list query, consumed
//! exactly once by the decision engine, never persisted.

use serde::{Deserialize, Serialize};

use super::record::{FileRecord, RelativePath};

/// One observed change on the remote filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChange {
    /// Path relative to the remote root
    pub path: RelativePath,
    /// Modification time in whole seconds since the Unix epoch
    pub mtime: i64,
    /// Size in bytes (0 for directories and deletions)
    pub size: u64,
    /// Whether the path is a directory
    pub is_directory: bool,
    /// Whether the path was deleted on the remote side
    pub is_delete: bool,
}

impl RemoteChange {
    /// The metadata this change would commit to the index if applied.
    #[must_use]
    pub fn as_record(&self) -> FileRecord {
        FileRecord {
            mtime: self.mtime,
            size: self.size,
            is_directory: self.is_directory,
            is_symlink: false,
        }
    }
}
