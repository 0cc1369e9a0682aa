//! Initial reconciliation
//!
//! One-time full-tree comparison run at session start, before continuous
//! watching begins. The remote listing is applied first so the index knows
//! what the remote side already has; the local walk then runs with
//! `is_initial_pass = true`, which pushes only files strictly newer than
//! their tracked record instead of re-sending the whole tree.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use devsync_core::ports::{IRemoteChannel, TransportError};

use crate::downstream::Downstream;
use crate::upstream::Upstream;
use crate::watcher::LocalEvent;
use crate::SyncError;

/// Outcome of the initial reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Files and directories pushed to the remote side
    pub uploaded: u64,
    /// Files and directories pulled from the remote side
    pub downloaded: u64,
}

/// Run the full-tree comparison in both directions.
///
/// Transport errors are fatal; local walk trouble on individual
/// subdirectories is logged and skipped.
pub async fn initial_reconcile(
    local_root: &Path,
    remote: &dyn IRemoteChannel,
    upstream: &Upstream,
    downstream: &Downstream,
    request_timeout: std::time::Duration,
) -> Result<ReconcileStats, SyncError> {
    info!(root = %local_root.display(), "initial reconciliation starting");

    // Remote side first: the first change-list query on a fresh session
    // returns the full remote tree.
    let changes = tokio::time::timeout(request_timeout, remote.list_changes())
        .await
        .map_err(|_| TransportError::Timeout("initial change listing"))??;
    debug!(changes = changes.len(), "initial remote listing received");
    let down_stats = downstream.apply_changes(changes).await?;

    // Then the local walk, evaluated with the initial-pass comparison.
    let mut events = Vec::new();
    walk_local_tree(local_root, &mut events).await;
    debug!(entries = events.len(), "initial local walk complete");
    let up_stats = upstream.apply_batch(events, true).await?;

    let stats = ReconcileStats {
        uploaded: up_stats.uploaded,
        downloaded: down_stats.downloaded,
    };
    info!(
        uploaded = stats.uploaded,
        downloaded = stats.downloaded,
        "initial reconciliation complete"
    );
    Ok(stats)
}

/// Recursively collect a `Touched` event for every entry under `dir`.
///
/// Unreadable directories are logged and skipped; symlinks are reported but
/// not followed (the decision predicates drop them later).
pub(crate) fn walk_local_tree<'a>(
    dir: &'a Path,
    events: &'a mut Vec<LocalEvent>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable directory");
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "directory iteration failed");
                    break;
                }
            };

            let path: PathBuf = entry.path();
            events.push(LocalEvent::Touched(path.clone()));

            let is_dir = match entry.file_type().await {
                Ok(ft) => ft.is_dir() && !ft.is_symlink(),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "file type unavailable");
                    false
                }
            };
            if is_dir {
                walk_local_tree(&path, events).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn walk_collects_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("src/nested"))
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("src/main.rs"), b"fn main() {}")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("src/nested/mod.rs"), b"")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("README.md"), b"# app")
            .await
            .unwrap();

        let mut events = Vec::new();
        walk_local_tree(dir.path(), &mut events).await;

        let mut names: Vec<String> = events
            .iter()
            .map(|e| {
                e.path()
                    .strip_prefix(dir.path())
                    .unwrap()
                    .display()
                    .to_string()
            })
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec!["README.md", "src", "src/main.rs", "src/nested", "src/nested/mod.rs"]
        );
        assert!(events.iter().all(|e| !e.is_removal()));
    }

    #[tokio::test]
    async fn walk_missing_root_collects_nothing() {
        let mut events = Vec::new();
        walk_local_tree(Path::new("/no/such/tree"), &mut events).await;
        assert!(events.is_empty());
    }
}
