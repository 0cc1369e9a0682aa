//! Transfer and deletion decision predicates
//!
//! Four pure predicates combining the file index, the ignore matchers and
//! live/observed metadata. Every caller evaluates them inside an index
//! critical section (see [`FileIndex`](crate::index::FileIndex)), so the map
//! a predicate reads cannot change between the decision and the mutation
//! that follows it.
//!
//! Comparisons work at one-second mtime granularity: two edits to the same
//! file within the same second and with coinciding size are indistinguishable
//! from "no change". That heuristic is deliberate and covered by tests; no
//! content hashing happens here.
//!
//! The predicates never error. Ambiguity always resolves toward doing
//! nothing: an upload that should have happened will be caught by a later
//! cycle, while a deletion that should not have happened cannot be undone.

use tracing::debug;

use devsync_core::domain::{FileRecord, RelativePath, RemoteChange};

use crate::ignore::Matchers;
use crate::index::FileMap;

// ============================================================================
// should_upload
// ============================================================================

/// Whether a locally observed path should be pushed to the remote side.
///
/// `local_stat` is the live symlink-aware stat (`None` when the path vanished
/// between observation and evaluation). `is_initial_pass` selects the initial
/// reconciliation comparison: during that pass a file is pushed only when it
/// is strictly newer than the tracked record, so files the remote side
/// already has are not re-sent merely because their absolute mtime is newer
/// than a default baseline. In steady state an mtime+size equality check
/// detects "no observable change" cheaply.
#[must_use]
pub fn should_upload(
    index: &FileMap,
    matchers: &Matchers,
    path: &RelativePath,
    local_stat: Option<&FileRecord>,
    is_initial_pass: bool,
) -> bool {
    let Some(stat) = local_stat else {
        return false;
    };

    if matchers.ignore.matches(path, stat.is_directory) {
        return false;
    }

    // Local symlinks are never pushed.
    if stat.is_symlink {
        return false;
    }

    if let Some(tracked) = index.get(path) {
        // Directories are created once, never re-uploaded.
        if stat.is_directory {
            return false;
        }

        if tracked.is_symlink {
            return false;
        }

        if is_initial_pass {
            // Not newer than what both sides already agreed on.
            if stat.mtime <= tracked.mtime {
                return false;
            }
        } else if stat.mtime == tracked.mtime && stat.size == tracked.size {
            // No observable change, or the change came from downstream.
            return false;
        }
    }

    true
}

// ============================================================================
// should_download
// ============================================================================

/// Whether a remote change should be pulled down over the local copy.
///
/// The same-mtime-different-size case guards against timestamp-granularity
/// aliasing masking a real content change; without it an older local file
/// that was not overwritten initially could shadow remote edits forever.
#[must_use]
pub fn should_download(index: &FileMap, change: &RemoteChange) -> bool {
    let Some(tracked) = index.get(&change.path) else {
        return true;
    };

    // Directories that exist in the index are never re-downloaded.
    if change.is_directory {
        return false;
    }

    if change.mtime > tracked.mtime {
        return true;
    }
    if change.mtime == tracked.mtime && change.size != tracked.size {
        return true;
    }

    false
}

// ============================================================================
// should_remove_remote
// ============================================================================

/// Whether a locally deleted path should be deleted on the remote side.
///
/// Consults the upload-exclusion matcher in addition to the general ignore
/// set: paths excluded from uploads were never pushed by us, so deleting
/// them remotely would destroy state we do not own.
#[must_use]
pub fn should_remove_remote(index: &FileMap, matchers: &Matchers, path: &RelativePath) -> bool {
    let Some(tracked) = index.get(path) else {
        // Never synchronized, or the event was already processed.
        return false;
    };

    if matchers.ignore.matches(path, tracked.is_directory) {
        return false;
    }
    if matchers.upload_exclude.matches(path, tracked.is_directory) {
        return false;
    }

    // Symlinks are never deletion targets.
    if tracked.is_symlink {
        return false;
    }

    true
}

// ============================================================================
// should_remove_local
// ============================================================================

/// Whether a remotely deleted path is still safe to delete locally.
///
/// The deletion was *decided* from a batch of remote changes, but by the
/// time it *executes* the local file may have been edited. `snapshot` is the
/// tracked record copied when the deletion was queued; `live_stat` is a
/// fresh stat taken immediately before execution (`None` when the path is
/// already gone or could not be statted; the caller logs stat failures).
///
/// A file is deleted only when all three views agree:
/// - the snapshot still equals the tracked record (no index commit landed
///   between queueing and execution), and
/// - the live mtime is not newer than the snapshot (no local edit landed
///   after the snapshot was captured).
///
/// Directory-ness disagreement between any two views means the path was
/// replaced by something else; skip defensively. Directories themselves
/// need no freshness check.
#[must_use]
pub fn should_remove_local(
    index: &FileMap,
    path: &RelativePath,
    snapshot: Option<&FileRecord>,
    live_stat: Option<&FileRecord>,
) -> bool {
    let Some(snapshot) = snapshot else {
        debug!(%path, "skip local delete: no pending snapshot");
        return false;
    };

    let Some(live) = live_stat else {
        // Nothing on disk to remove.
        return false;
    };

    let Some(tracked) = index.get(path) else {
        debug!(%path, "skip local delete: path no longer tracked");
        return false;
    };

    if live.is_directory != tracked.is_directory || live.is_directory != snapshot.is_directory {
        debug!(%path, "skip local delete: directory-ness disagrees between live, snapshot and index");
        return false;
    }

    if snapshot.is_directory {
        return true;
    }

    if snapshot.mtime != tracked.mtime || snapshot.size != tracked.size {
        debug!(
            %path,
            snapshot_mtime = snapshot.mtime,
            tracked_mtime = tracked.mtime,
            snapshot_size = snapshot.size,
            tracked_size = tracked.size,
            "skip local delete: index changed since deletion was queued"
        );
        return false;
    }

    if live.mtime > snapshot.mtime {
        debug!(
            %path,
            live_mtime = live.mtime,
            snapshot_mtime = snapshot.mtime,
            "skip local delete: file edited after snapshot capture"
        );
        return false;
    }

    true
}
