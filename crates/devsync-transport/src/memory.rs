//! In-process remote endpoint
//!
//! [`MemoryRemote`] speaks the real framed protocol over an in-memory
//! duplex pipe, backed by a simulated remote tree with a change journal.
//! Integration tests drive full sync cycles against it: seed the tree,
//! mutate it mid-session, and assert on what the engine uploaded.
//!
//! Client-initiated operations (uploads, deletions coming over the wire)
//! mutate the tree but are *not* journaled, mirroring a remote agent that
//! filters out the changes the sync protocol itself caused. Mutations made
//! through the [`MemoryRemoteHandle`] are journaled and show up in the next
//! change listing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use devsync_core::domain::{RelativePath, RemoteChange};

use crate::channel::RemoteChannel;
use crate::protocol::{read_frame, write_frame, Frame, Request, Response};

/// Buffer size of the in-memory duplex pipe.
const PIPE_CAPACITY: usize = 1024 * 1024;

/// One entry in the simulated remote tree.
#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    mtime: i64,
    is_directory: bool,
}

#[derive(Debug, Default)]
struct RemoteState {
    entries: HashMap<RelativePath, Entry>,
    journal: Vec<RemoteChange>,
    listed_once: bool,
}

impl RemoteState {
    fn change_for(&self, path: &RelativePath, entry: &Entry) -> RemoteChange {
        RemoteChange {
            path: path.clone(),
            mtime: entry.mtime,
            size: if entry.is_directory {
                0
            } else {
                entry.data.len() as u64
            },
            is_directory: entry.is_directory,
            is_delete: false,
        }
    }

    /// Insert missing parent directories for `path` without journaling.
    fn ensure_parents(&mut self, path: &RelativePath, mtime: i64) {
        let full = path.as_str();
        let mut end = 0usize;
        while let Some(next) = full[end + 1..].find('/') {
            end = end + 1 + next;
            let parent = RelativePath::new(&full[..end]).expect("prefix of a valid path");
            self.entries.entry(parent).or_insert(Entry {
                data: Vec::new(),
                mtime,
                is_directory: true,
            });
        }
    }

    fn apply(&mut self, request: Request) -> Response {
        match request {
            Request::ListChanges => {
                let mut changes: Vec<RemoteChange> = Vec::new();
                if !self.listed_once {
                    self.listed_once = true;
                    // Full tree, parents before children; seeds queued in
                    // the journal are already represented here.
                    let mut paths: Vec<RelativePath> = self.entries.keys().cloned().collect();
                    paths.sort();
                    for path in paths {
                        let entry = self.entries[&path].clone();
                        changes.push(self.change_for(&path, &entry));
                    }
                    self.journal.clear();
                } else {
                    changes.append(&mut self.journal);
                }
                Response::Changes(changes)
            }

            Request::Upload { path, mtime, data } => {
                self.ensure_parents(&path, mtime);
                self.entries.insert(
                    path,
                    Entry {
                        data,
                        mtime,
                        is_directory: false,
                    },
                );
                Response::Done
            }

            Request::Download { path } => match self.entries.get(&path) {
                Some(entry) if !entry.is_directory => Response::Content(entry.data.clone()),
                Some(_) => Response::Error(format!("is a directory: {path}")),
                None => Response::Error(format!("no such file: {path}")),
            },

            Request::Mkdir { path, mtime } => {
                self.ensure_parents(&path, mtime);
                self.entries.entry(path).or_insert(Entry {
                    data: Vec::new(),
                    mtime,
                    is_directory: true,
                });
                Response::Done
            }

            Request::Delete { path } => {
                self.entries
                    .retain(|tracked, _| !tracked.starts_with(&path));
                Response::Done
            }
        }
    }
}

/// Factory for in-process remote endpoints.
pub struct MemoryRemote;

impl MemoryRemote {
    /// Build a connected `(channel, remote)` pair over a duplex pipe.
    pub fn pair(request_timeout: Duration) -> (RemoteChannel<DuplexStream>, MemoryRemoteHandle) {
        let (client_side, server_side) = tokio::io::duplex(PIPE_CAPACITY);
        let channel = RemoteChannel::new(client_side, request_timeout);
        let handle = Self::serve(server_side);
        (channel, handle)
    }

    /// Serve the protocol over an arbitrary stream.
    pub fn serve(stream: DuplexStream) -> MemoryRemoteHandle {
        let state = Arc::new(Mutex::new(RemoteState::default()));
        let task_state = state.clone();

        let task = tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(stream);
            loop {
                let frame: Frame<Request> = match read_frame(&mut reader).await {
                    Ok(frame) => frame,
                    Err(err) => {
                        debug!(error = %err, "memory remote: client disconnected");
                        break;
                    }
                };

                let response = task_state.lock().await.apply(frame.body);
                let out = Frame {
                    id: frame.id,
                    body: response,
                };
                if let Err(err) = write_frame(&mut writer, &out).await {
                    debug!(error = %err, "memory remote: write failed");
                    break;
                }
            }
        });

        MemoryRemoteHandle { state, task }
    }
}

/// Inspection and mutation handle for a served [`MemoryRemote`].
pub struct MemoryRemoteHandle {
    state: Arc<Mutex<RemoteState>>,
    task: JoinHandle<()>,
}

impl MemoryRemoteHandle {
    /// Create or replace a file, journaling the change.
    pub async fn put_file(&self, path: &RelativePath, data: Vec<u8>, mtime: i64) {
        let mut state = self.state.lock().await;
        state.ensure_parents(path, mtime);
        let entry = Entry {
            data,
            mtime,
            is_directory: false,
        };
        let change = state.change_for(path, &entry);
        state.entries.insert(path.clone(), entry);
        state.journal.push(change);
    }

    /// Create a directory, journaling the change.
    pub async fn put_directory(&self, path: &RelativePath, mtime: i64) {
        let mut state = self.state.lock().await;
        state.ensure_parents(path, mtime);
        let entry = Entry {
            data: Vec::new(),
            mtime,
            is_directory: true,
        };
        let change = state.change_for(path, &entry);
        state.entries.insert(path.clone(), entry);
        state.journal.push(change);
    }

    /// Delete a path (and its subtree), journaling the deletion.
    pub async fn remove(&self, path: &RelativePath) {
        let mut state = self.state.lock().await;
        let was_dir = state
            .entries
            .get(path)
            .map(|e| e.is_directory)
            .unwrap_or(false);
        state.entries.retain(|tracked, _| !tracked.starts_with(path));
        state.journal.push(RemoteChange {
            path: path.clone(),
            mtime: 0,
            size: 0,
            is_directory: was_dir,
            is_delete: true,
        });
    }

    /// Content of a file, `None` for directories and missing paths.
    pub async fn file_content(&self, path: &RelativePath) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .entries
            .get(path)
            .filter(|e| !e.is_directory)
            .map(|e| e.data.clone())
    }

    /// The mtime recorded for a path, if present.
    pub async fn entry_mtime(&self, path: &RelativePath) -> Option<i64> {
        self.state.lock().await.entries.get(path).map(|e| e.mtime)
    }

    /// Whether any entry exists at `path`.
    pub async fn contains(&self, path: &RelativePath) -> bool {
        self.state.lock().await.entries.contains_key(path)
    }

    /// Total number of entries (files + directories).
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }
}

impl Drop for MemoryRemoteHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    #[tokio::test]
    async fn upload_creates_missing_parents() {
        let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));
        use devsync_core::ports::IRemoteChannel;

        channel
            .upload(&rel("/a/b/c.txt"), 1000, b"x".to_vec())
            .await
            .unwrap();

        assert!(remote.contains(&rel("/a")).await);
        assert!(remote.contains(&rel("/a/b")).await);
        assert!(remote.contains(&rel("/a/b/c.txt")).await);
    }

    #[tokio::test]
    async fn delete_removes_subtree() {
        let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));
        use devsync_core::ports::IRemoteChannel;

        channel.upload(&rel("/d/one.txt"), 1, b"1".to_vec()).await.unwrap();
        channel.upload(&rel("/d/two.txt"), 1, b"2".to_vec()).await.unwrap();
        channel.delete(&rel("/d")).await.unwrap();

        assert_eq!(remote.entry_count().await, 0);
    }

    #[tokio::test]
    async fn handle_mutations_are_journaled_but_client_ops_are_not() {
        let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));
        use devsync_core::ports::IRemoteChannel;

        // Consume the initial full listing.
        let _ = channel.list_changes().await.unwrap();

        channel.upload(&rel("/mine.txt"), 1, b"m".to_vec()).await.unwrap();
        remote.put_file(&rel("/theirs.txt"), b"t".to_vec(), 2).await;

        let changes = channel.list_changes().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, rel("/theirs.txt"));
    }
}
