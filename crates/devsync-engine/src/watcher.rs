//! Local change collection
//!
//! Wraps the `notify` crate to observe the local tree and converts raw OS
//! events into [`LocalEvent`] values the upstream pipeline understands. A
//! [`DebounceQueue`] coalesces rapid-fire events per path so a file being
//! actively written is synced once, after it settles, instead of on every
//! intermediate save.
//!
//! ## Flow
//!
//! ```text
//! inotify / kqueue
//!       │
//!       ▼
//!  LocalWatcher ──→ mpsc::channel ──→ DebounceQueue ──→ upstream batch
//! ```
//!
//! The engine has no rename operation on the wire, so rename events are
//! split into a removal of the old path and a touch of the new one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// ============================================================================
// LocalEvent
// ============================================================================

/// A change observed on the local tree, decoupled from `notify`'s raw types.
///
/// There is no distinction between "created" and "modified": the upstream
/// pipeline stats the path and decides from live metadata either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    /// The path exists (or existed moments ago) with possibly new content
    Touched(PathBuf),
    /// The path was removed
    Removed(PathBuf),
}

impl LocalEvent {
    /// The path this event refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            LocalEvent::Touched(p) | LocalEvent::Removed(p) => p,
        }
    }

    /// Whether this event reports a removal.
    #[must_use]
    pub fn is_removal(&self) -> bool {
        matches!(self, LocalEvent::Removed(_))
    }
}

// ============================================================================
// Event mapping - notify::Event → LocalEvent
// ============================================================================

/// Convert a raw `notify` event into zero or more [`LocalEvent`]s.
///
/// - `Create(*)` and `Modify(Data/Metadata/...)` → `Touched`
/// - `Remove(*)` → `Removed`
/// - `Modify(Name(Both))` with two paths → `Removed(old)` + `Touched(new)`
/// - access events and pathless events → nothing
fn map_notify_event(event: &notify::Event) -> Vec<LocalEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => paths
            .first()
            .map(|p| vec![LocalEvent::Touched(p.clone())])
            .unwrap_or_default(),

        EventKind::Remove(_) => paths
            .first()
            .map(|p| vec![LocalEvent::Removed(p.clone())])
            .unwrap_or_default(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() >= 2 => {
            debug!(
                old = %paths[0].display(),
                new = %paths[1].display(),
                "rename split into remove + touch"
            );
            vec![
                LocalEvent::Removed(paths[0].clone()),
                LocalEvent::Touched(paths[1].clone()),
            ]
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths
            .first()
            .map(|p| vec![LocalEvent::Removed(p.clone())])
            .unwrap_or_default(),

        EventKind::Modify(_) => paths
            .first()
            .map(|p| vec![LocalEvent::Touched(p.clone())])
            .unwrap_or_default(),

        _ => Vec::new(),
    }
}

// ============================================================================
// LocalWatcher
// ============================================================================

/// Recursive watcher over the local sync root.
///
/// Uses the OS-native notification mechanism (inotify on Linux). Raw events
/// are mapped and pushed into an mpsc channel; the watch stops when the
/// watcher is dropped.
pub struct LocalWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
}

impl LocalWatcher {
    /// Start watching `root` recursively.
    ///
    /// Returns the watcher (keep it alive for the watch duration) and the
    /// receiving end of the event channel.
    pub fn start(root: &Path) -> Result<(Self, mpsc::Receiver<LocalEvent>)> {
        let (tx, rx) = mpsc::channel::<LocalEvent>(1024);

        info!(root = %root.display(), "starting recursive local watch");

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for local in map_notify_event(&event) {
                        if let Err(e) = tx.blocking_send(local) {
                            warn!(error = %e, "dropping local event (receiver gone)");
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "local watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("create local filesystem watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("watch path: {}", root.display()))?;

        Ok((
            Self {
                watcher,
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    /// The watched root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop watching explicitly (also happens on drop).
    pub fn stop(mut self) {
        if let Err(err) = self.watcher.unwatch(&self.root.clone()) {
            debug!(error = %err, "unwatch on stop failed");
        }
    }
}

// ============================================================================
// DebounceQueue
// ============================================================================

/// Per-path coalescing queue.
///
/// Each push replaces the path's pending event and resets its timestamp, so
/// a path being hammered keeps extending its quiet window until the writes
/// stop. [`poll`](DebounceQueue::poll) returns only events whose window has
/// elapsed.
#[derive(Debug)]
pub struct DebounceQueue {
    pending: HashMap<PathBuf, (LocalEvent, Instant)>,
    quiet_window: Duration,
}

impl DebounceQueue {
    /// Create a queue with the given quiet window.
    #[must_use]
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            quiet_window,
        }
    }

    /// Insert or update the pending event for the event's path.
    pub fn push(&mut self, event: LocalEvent) {
        let path = event.path().to_path_buf();
        self.pending.insert(path, (event, Instant::now()));
    }

    /// Remove and return all events that have been quiet long enough.
    pub fn poll(&mut self) -> Vec<LocalEvent> {
        let now = Instant::now();
        let settled_paths: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= self.quiet_window)
            .map(|(path, _)| path.clone())
            .collect();

        let mut settled = Vec::with_capacity(settled_paths.len());
        for path in settled_paths {
            if let Some((event, _)) = self.pending.remove(&path) {
                settled.push(event);
            }
        }
        settled
    }

    /// Remove and return everything, regardless of quiet window.
    ///
    /// Used when the session is stopping and pending work must flush.
    pub fn drain(&mut self) -> Vec<LocalEvent> {
        self.pending.drain().map(|(_, (event, _))| event).collect()
    }

    /// Number of paths still waiting out their window.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_create_is_touched() {
        let event = notify::Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![PathBuf::from("/a.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&event),
            vec![LocalEvent::Touched(PathBuf::from("/a.txt"))]
        );
    }

    #[test]
    fn map_modify_data_is_touched() {
        let event = notify::Event {
            kind: EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            paths: vec![PathBuf::from("/a.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&event),
            vec![LocalEvent::Touched(PathBuf::from("/a.txt"))]
        );
    }

    #[test]
    fn map_remove_is_removed() {
        let event = notify::Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/a.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&event),
            vec![LocalEvent::Removed(PathBuf::from("/a.txt"))]
        );
    }

    #[test]
    fn map_rename_splits_into_remove_and_touch() {
        let event = notify::Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            paths: vec![PathBuf::from("/old.txt"), PathBuf::from("/new.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&event),
            vec![
                LocalEvent::Removed(PathBuf::from("/old.txt")),
                LocalEvent::Touched(PathBuf::from("/new.txt")),
            ]
        );
    }

    #[test]
    fn map_rename_from_only_is_removed() {
        let event = notify::Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            paths: vec![PathBuf::from("/old.txt")],
            attrs: Default::default(),
        };
        assert_eq!(
            map_notify_event(&event),
            vec![LocalEvent::Removed(PathBuf::from("/old.txt"))]
        );
    }

    #[test]
    fn map_access_is_ignored() {
        let event = notify::Event {
            kind: EventKind::Access(notify::event::AccessKind::Read),
            paths: vec![PathBuf::from("/a.txt")],
            attrs: Default::default(),
        };
        assert!(map_notify_event(&event).is_empty());
    }

    #[test]
    fn map_event_without_paths_is_ignored() {
        let event = notify::Event {
            kind: EventKind::Create(notify::event::CreateKind::File),
            paths: vec![],
            attrs: Default::default(),
        };
        assert!(map_notify_event(&event).is_empty());
    }

    // ------------------------------------------------------------------
    // DebounceQueue
    // ------------------------------------------------------------------

    #[test]
    fn push_coalesces_per_path() {
        let mut queue = DebounceQueue::new(Duration::from_millis(100));
        queue.push(LocalEvent::Touched(PathBuf::from("/a.txt")));
        queue.push(LocalEvent::Touched(PathBuf::from("/a.txt")));
        queue.push(LocalEvent::Removed(PathBuf::from("/a.txt")));
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn poll_keeps_recent_events_pending() {
        let mut queue = DebounceQueue::new(Duration::from_secs(60));
        queue.push(LocalEvent::Touched(PathBuf::from("/a.txt")));
        assert!(queue.poll().is_empty());
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn poll_returns_latest_event_after_window() {
        let mut queue = DebounceQueue::new(Duration::ZERO);
        queue.push(LocalEvent::Touched(PathBuf::from("/a.txt")));
        queue.push(LocalEvent::Removed(PathBuf::from("/a.txt")));

        std::thread::sleep(Duration::from_millis(5));
        let settled = queue.poll();
        assert_eq!(settled, vec![LocalEvent::Removed(PathBuf::from("/a.txt"))]);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn poll_settles_paths_independently() {
        let mut queue = DebounceQueue::new(Duration::from_millis(50));
        queue.push(LocalEvent::Touched(PathBuf::from("/old.txt")));
        std::thread::sleep(Duration::from_millis(60));
        queue.push(LocalEvent::Touched(PathBuf::from("/new.txt")));

        let settled = queue.poll();
        assert_eq!(settled, vec![LocalEvent::Touched(PathBuf::from("/old.txt"))]);
        assert_eq!(queue.pending_count(), 1);
    }

    #[test]
    fn repeated_pushes_extend_the_window() {
        let mut queue = DebounceQueue::new(Duration::from_millis(50));
        queue.push(LocalEvent::Touched(PathBuf::from("/a.txt")));
        std::thread::sleep(Duration::from_millis(30));
        queue.push(LocalEvent::Touched(PathBuf::from("/a.txt")));
        std::thread::sleep(Duration::from_millis(30));

        // 60ms since first push, but only 30ms since the latest.
        assert!(queue.poll().is_empty());
    }

    #[test]
    fn drain_flushes_everything() {
        let mut queue = DebounceQueue::new(Duration::from_secs(60));
        queue.push(LocalEvent::Touched(PathBuf::from("/a.txt")));
        queue.push(LocalEvent::Removed(PathBuf::from("/b.txt")));
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(queue.pending_count(), 0);
    }

    #[tokio::test]
    async fn watcher_reports_file_creation() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, mut rx) = LocalWatcher::start(dir.path()).unwrap();

        tokio::fs::write(dir.path().join("hello.txt"), b"hi")
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watcher should report the new file")
            .expect("channel open");
        assert!(event.path().ends_with("hello.txt"));

        watcher.stop();
    }
}
