//! File index records and validated relative paths
//!
//! [`FileRecord`] is the last-known synchronized metadata for one path and
//! is the value type of the file index. [`RelativePath`] is the key: a
//! normalized, `/`-rooted path relative to the synchronized root, validated
//! at construction time so the index never holds ambiguous or escaping keys.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// RelativePath
// ============================================================================

/// A normalized path relative to the synchronized root.
///
/// Invariants enforced at construction:
/// - always starts with `/` and uses `/` separators regardless of platform
/// - never empty, never contains `.` or `..` components
/// - `/` itself denotes the root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelativePath(String);

impl RelativePath {
    /// Create a `RelativePath` from a string, validating and normalizing it.
    ///
    /// Accepts both `"dir/file.txt"` and `"/dir/file.txt"`.
    pub fn new(path: impl AsRef<str>) -> Result<Self, DomainError> {
        let raw = path.as_ref();
        if raw.contains('\0') {
            return Err(DomainError::InvalidPath(raw.to_string()));
        }

        let mut parts = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => continue,
                ".." => return Err(DomainError::PathEscapesRoot(raw.to_string())),
                p => parts.push(p),
            }
        }

        Ok(Self(format!("/{}", parts.join("/"))))
    }

    /// The root path (`/`).
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Build a `RelativePath` by stripping `root` from an absolute path.
    ///
    /// Fails when `abs` does not live under `root`.
    pub fn from_absolute(abs: &Path, root: &Path) -> Result<Self, DomainError> {
        let rel = abs
            .strip_prefix(root)
            .map_err(|_| DomainError::PathEscapesRoot(abs.display().to_string()))?;

        let mut parts = Vec::new();
        for comp in rel.components() {
            match comp {
                Component::Normal(p) => parts.push(
                    p.to_str()
                        .ok_or_else(|| DomainError::InvalidPath(abs.display().to_string()))?
                        .to_string(),
                ),
                Component::CurDir => continue,
                _ => return Err(DomainError::PathEscapesRoot(abs.display().to_string())),
            }
        }

        Ok(Self(format!("/{}", parts.join("/"))))
    }

    /// Resolve this path against an absolute root directory.
    #[must_use]
    pub fn to_absolute(&self, root: &Path) -> PathBuf {
        root.join(self.0.trim_start_matches('/'))
    }

    /// The path as a string slice, always `/`-rooted.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the root path `/`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Number of components, 0 for the root.
    ///
    /// Used to order deletions children-first.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches('/').count()
        }
    }

    /// True when `self` is `other` or lives underneath it.
    #[must_use]
    pub fn starts_with(&self, other: &RelativePath) -> bool {
        if other.is_root() {
            return true;
        }
        self.0 == other.0 || self.0.starts_with(&format!("{}/", other.0))
    }
}

impl Display for RelativePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RelativePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ============================================================================
// FileRecord
// ============================================================================

/// Last-known synchronized metadata for one path.
///
/// A record exists only after a transfer or directory creation succeeded in
/// either direction; absence means the path is not yet known to be
/// synchronized. Modification time is kept at one-second granularity, the
/// resolution the decision predicates compare at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Modification time in whole seconds since the Unix epoch
    pub mtime: i64,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Whether the entry is a directory
    pub is_directory: bool,
    /// Whether the entry is a symbolic link
    pub is_symlink: bool,
}

impl FileRecord {
    /// Record for a regular file.
    #[must_use]
    pub fn file(mtime: i64, size: u64) -> Self {
        Self {
            mtime,
            size,
            is_directory: false,
            is_symlink: false,
        }
    }

    /// Record for a directory.
    #[must_use]
    pub fn directory(mtime: i64) -> Self {
        Self {
            mtime,
            size: 0,
            is_directory: true,
            is_symlink: false,
        }
    }

    /// Build a record from filesystem metadata obtained via `symlink_metadata`.
    ///
    /// Returns `None` when the modification time is unavailable on the
    /// platform, which the callers treat the same as a failed stat.
    #[must_use]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Option<Self> {
        let mtime = meta
            .modified()
            .ok()?
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?
            .as_secs() as i64;

        Some(Self {
            mtime,
            size: if meta.is_dir() { 0 } else { meta.len() },
            is_directory: meta.is_dir(),
            is_symlink: meta.file_type().is_symlink(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- RelativePath --

    #[test]
    fn new_normalizes_missing_leading_slash() {
        let p = RelativePath::new("src/main.rs").unwrap();
        assert_eq!(p.as_str(), "/src/main.rs");
    }

    #[test]
    fn new_collapses_duplicate_separators_and_dots() {
        let p = RelativePath::new("//src/.//lib//").unwrap();
        assert_eq!(p.as_str(), "/src/lib");
    }

    #[test]
    fn new_rejects_parent_components() {
        assert!(matches!(
            RelativePath::new("../etc/passwd"),
            Err(DomainError::PathEscapesRoot(_))
        ));
        assert!(matches!(
            RelativePath::new("/a/../../b"),
            Err(DomainError::PathEscapesRoot(_))
        ));
    }

    #[test]
    fn empty_input_is_root() {
        assert!(RelativePath::new("").unwrap().is_root());
        assert!(RelativePath::new("/").unwrap().is_root());
    }

    #[test]
    fn from_absolute_strips_root() {
        let p =
            RelativePath::from_absolute(Path::new("/work/app/src/main.rs"), Path::new("/work/app"))
                .unwrap();
        assert_eq!(p.as_str(), "/src/main.rs");
    }

    #[test]
    fn from_absolute_rejects_outside_root() {
        let result = RelativePath::from_absolute(Path::new("/other/file"), Path::new("/work/app"));
        assert!(result.is_err());
    }

    #[test]
    fn to_absolute_round_trips() {
        let p = RelativePath::new("/src/main.rs").unwrap();
        assert_eq!(
            p.to_absolute(Path::new("/work/app")),
            PathBuf::from("/work/app/src/main.rs")
        );
    }

    #[test]
    fn depth_counts_components() {
        assert_eq!(RelativePath::root().depth(), 0);
        assert_eq!(RelativePath::new("/a").unwrap().depth(), 1);
        assert_eq!(RelativePath::new("/a/b/c").unwrap().depth(), 3);
    }

    #[test]
    fn starts_with_matches_prefixes_only_at_boundaries() {
        let dir = RelativePath::new("/src").unwrap();
        let inside = RelativePath::new("/src/main.rs").unwrap();
        let sibling = RelativePath::new("/srcfoo").unwrap();

        assert!(inside.starts_with(&dir));
        assert!(dir.starts_with(&dir));
        assert!(!sibling.starts_with(&dir));
        assert!(inside.starts_with(&RelativePath::root()));
    }

    // -- FileRecord --

    #[test]
    fn file_and_directory_constructors() {
        let f = FileRecord::file(1000, 50);
        assert!(!f.is_directory);
        assert_eq!(f.size, 50);

        let d = FileRecord::directory(1000);
        assert!(d.is_directory);
        assert_eq!(d.size, 0);
    }

    #[test]
    fn from_metadata_captures_mtime_and_size() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"hello").unwrap();
        let meta = std::fs::symlink_metadata(tmp.path()).unwrap();

        let record = FileRecord::from_metadata(&meta).unwrap();
        assert_eq!(record.size, 5);
        assert!(!record.is_directory);
        assert!(!record.is_symlink);
        assert!(record.mtime > 0);
    }

    #[test]
    fn record_serde_round_trip() {
        let record = FileRecord::file(1234, 77);
        let json = serde_json::to_string(&record).unwrap();
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
