//! Multiplexed remote channel
//!
//! [`RemoteChannel`] implements [`IRemoteChannel`] over any duplex byte
//! stream (an attached child process's stdio, a test duplex pipe). Multiple
//! transfer workers issue logical operations concurrently; each request
//! carries a correlation id, writes are serialized frame-at-a-time behind a
//! mutex, and a background reader task routes responses back to their
//! waiting callers. Per-operation timeouts turn a stalled remote endpoint
//! into an explicit [`TransportError::Timeout`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use devsync_core::domain::{RelativePath, RemoteChange};
use devsync_core::ports::{IRemoteChannel, TransportError};

use crate::protocol::{read_frame, write_frame, Frame, Request, Response};

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// Client side of the framed protocol.
pub struct RemoteChannel<S: AsyncRead + AsyncWrite + Send + 'static> {
    writer: Mutex<WriteHalf<S>>,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> RemoteChannel<S> {
    /// Wrap a duplex stream and start the response dispatcher.
    pub fn new(stream: S, request_timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));

        let reader = tokio::spawn(dispatch_responses(read_half, pending.clone()));

        Self {
            writer: Mutex::new(write_half),
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader,
        }
    }

    /// Send one request and wait for its correlated response.
    async fn request(&self, body: Request) -> Result<Response, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);

        let frame = Frame { id, body };
        let write_result = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &frame).await
        };
        if let Err(err) = write_result {
            self.pending.lock().expect("pending map poisoned").remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Err(_elapsed) => {
                self.pending.lock().expect("pending map poisoned").remove(&id);
                Err(TransportError::Timeout("remote operation"))
            }
            // Sender dropped: the dispatcher died with the stream.
            Ok(Err(_recv)) => Err(TransportError::ConnectionLost(
                "response dispatcher gone".into(),
            )),
            Ok(Ok(Response::Error(message))) => Err(TransportError::Remote(message)),
            Ok(Ok(response)) => Ok(response),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> Drop for RemoteChannel<S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Background task: read response frames and hand each to its waiter.
async fn dispatch_responses<S: AsyncRead + AsyncWrite + Send>(
    mut read_half: ReadHalf<S>,
    pending: PendingMap,
) {
    loop {
        match read_frame::<_, Response>(&mut read_half).await {
            Ok(frame) => {
                let waiter = pending
                    .lock()
                    .expect("pending map poisoned")
                    .remove(&frame.id);
                match waiter {
                    Some(tx) => {
                        // A waiter that timed out already is gone; dropping
                        // the response is correct then.
                        let _ = tx.send(frame.body);
                    }
                    None => debug!(id = frame.id, "response for unknown or expired request"),
                }
            }
            Err(err) => {
                warn!(error = %err, "remote channel read failed, dropping pending waiters");
                // Dropping the senders wakes every waiter with ConnectionLost.
                pending.lock().expect("pending map poisoned").clear();
                break;
            }
        }
    }
}

#[async_trait::async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> IRemoteChannel for RemoteChannel<S> {
    async fn list_changes(&self) -> Result<Vec<RemoteChange>, TransportError> {
        match self.request(Request::ListChanges).await? {
            Response::Changes(changes) => Ok(changes),
            other => Err(TransportError::Protocol(format!(
                "expected Changes, got {other:?}"
            ))),
        }
    }

    async fn upload(
        &self,
        path: &RelativePath,
        mtime: i64,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        match self
            .request(Request::Upload {
                path: path.clone(),
                mtime,
                data,
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(TransportError::Protocol(format!(
                "expected Done, got {other:?}"
            ))),
        }
    }

    async fn download(&self, path: &RelativePath) -> Result<Vec<u8>, TransportError> {
        match self.request(Request::Download { path: path.clone() }).await? {
            Response::Content(data) => Ok(data),
            other => Err(TransportError::Protocol(format!(
                "expected Content, got {other:?}"
            ))),
        }
    }

    async fn create_directory(
        &self,
        path: &RelativePath,
        mtime: i64,
    ) -> Result<(), TransportError> {
        match self
            .request(Request::Mkdir {
                path: path.clone(),
                mtime,
            })
            .await?
        {
            Response::Done => Ok(()),
            other => Err(TransportError::Protocol(format!(
                "expected Done, got {other:?}"
            ))),
        }
    }

    async fn delete(&self, path: &RelativePath) -> Result<(), TransportError> {
        match self.request(Request::Delete { path: path.clone() }).await? {
            Response::Done => Ok(()),
            other => Err(TransportError::Protocol(format!(
                "expected Done, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRemote;

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    #[tokio::test]
    async fn upload_then_download_round_trip() {
        let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));

        channel
            .upload(&rel("/a.txt"), 1000, b"hello".to_vec())
            .await
            .unwrap();
        assert_eq!(remote.file_content(&rel("/a.txt")).await, Some(b"hello".to_vec()));

        let data = channel.download(&rel("/a.txt")).await.unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn download_missing_file_is_remote_error() {
        let (channel, _remote) = MemoryRemote::pair(Duration::from_secs(5));
        let result = channel.download(&rel("/nope.txt")).await;
        assert!(matches!(result, Err(TransportError::Remote(_))));
    }

    #[tokio::test]
    async fn first_listing_returns_full_tree() {
        let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));
        remote.put_file(&rel("/x.txt"), b"x".to_vec(), 500).await;
        remote.put_directory(&rel("/dir"), 500).await;

        let changes = channel.list_changes().await.unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| !c.is_delete));

        // Second listing with no new activity is empty.
        assert!(channel.list_changes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deletions_appear_in_the_journal() {
        let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));
        remote.put_file(&rel("/x.txt"), b"x".to_vec(), 500).await;
        let _ = channel.list_changes().await.unwrap();

        remote.remove(&rel("/x.txt")).await;
        let changes = channel.list_changes().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_delete);
        assert_eq!(changes[0].path, rel("/x.txt"));
    }

    #[tokio::test]
    async fn concurrent_requests_multiplex_over_one_stream() {
        let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));
        let channel = Arc::new(channel);

        let mut handles = Vec::new();
        for i in 0..16 {
            let ch = channel.clone();
            handles.push(tokio::spawn(async move {
                let path = rel(&format!("/file-{i}.txt"));
                ch.upload(&path, 1000 + i, vec![i as u8; 64]).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(remote.entry_count().await, 16);
    }

    #[tokio::test]
    async fn dead_peer_is_connection_lost() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let channel = RemoteChannel::new(client, Duration::from_secs(1));

        let result = channel.list_changes().await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectionLost(_)) | Err(TransportError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn unresponsive_peer_times_out() {
        // A peer that never answers: keep the server half alive but silent.
        let (client, _server) = tokio::io::duplex(1024);
        let channel = RemoteChannel::new(client, Duration::from_millis(100));

        let result = channel.list_changes().await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn delete_missing_path_is_ok() {
        let (channel, _remote) = MemoryRemote::pair(Duration::from_secs(5));
        channel.delete(&rel("/never-existed")).await.unwrap();
    }
}
