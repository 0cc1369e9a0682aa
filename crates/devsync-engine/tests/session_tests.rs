//! End-to-end sync cycles over the in-process remote endpoint.
//!
//! Each test builds a real temp directory, wires a [`SyncSession`] to a
//! [`MemoryRemote`] speaking the framed protocol over a duplex pipe, and
//! asserts on the converged state of both trees.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use devsync_core::config::{Config, ConfigBuilder};
use devsync_core::domain::{RelativePath, SessionEvent, SessionState};
use devsync_engine::session::{SessionHandle, SyncSession};
use devsync_transport::{MemoryRemote, MemoryRemoteHandle};

fn rel(s: &str) -> RelativePath {
    RelativePath::new(s).unwrap()
}

fn test_config(root: &Path) -> Config {
    ConfigBuilder::new()
        .local_root(root.to_path_buf())
        .remote_root("/app")
        .attach_command(vec!["test-agent".into()])
        .poll_interval(1)
        .debounce_delay_ms(50)
        .request_timeout(5)
        .build()
}

async fn start_session(config: Config) -> (SessionHandle, MemoryRemoteHandle) {
    let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));
    let handle = SyncSession::start(config, Arc::new(channel))
        .await
        .expect("session should start");
    (handle, remote)
}

/// Poll `check` until it returns true or the deadline passes.
async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for: {what}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn initial_sync_uploads_local_tree() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(dir.path().join("src")).await.unwrap();
    tokio::fs::write(dir.path().join("src/main.rs"), b"fn main() {}")
        .await
        .unwrap();
    tokio::fs::write(dir.path().join("README.md"), b"# app").await.unwrap();

    let (mut handle, remote) = start_session(test_config(dir.path())).await;
    assert_eq!(handle.state(), SessionState::Watching);

    match handle.next_event().await {
        Some(SessionEvent::InitialSyncComplete { uploaded, downloaded }) => {
            // src, src/main.rs, README.md
            assert_eq!(uploaded, 3);
            assert_eq!(downloaded, 0);
        }
        other => panic!("expected InitialSyncComplete, got {other:?}"),
    }

    assert!(remote.contains(&rel("/src")).await);
    assert_eq!(
        remote.file_content(&rel("/src/main.rs")).await,
        Some(b"fn main() {}".to_vec())
    );
    assert_eq!(
        remote.file_content(&rel("/README.md")).await,
        Some(b"# app".to_vec())
    );

    handle.stop(None).await;
}

#[tokio::test]
async fn initial_sync_downloads_remote_tree() {
    let dir = tempfile::tempdir().unwrap();

    let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));
    remote.put_directory(&rel("/assets"), 1_600_000_000).await;
    remote
        .put_file(&rel("/assets/logo.svg"), b"<svg/>".to_vec(), 1_600_000_100)
        .await;

    let mut handle = SyncSession::start(test_config(dir.path()), Arc::new(channel))
        .await
        .unwrap();

    match handle.next_event().await {
        Some(SessionEvent::InitialSyncComplete { uploaded, downloaded }) => {
            assert_eq!(downloaded, 2);
            assert_eq!(uploaded, 0);
        }
        other => panic!("expected InitialSyncComplete, got {other:?}"),
    }

    let local = dir.path().join("assets/logo.svg");
    assert_eq!(tokio::fs::read(&local).await.unwrap(), b"<svg/>");

    // The remote mtime landed on disk with the content.
    let meta = tokio::fs::metadata(&local).await.unwrap();
    let mtime = meta
        .modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    assert_eq!(mtime, 1_600_000_100);

    handle.stop(None).await;
}

#[tokio::test]
async fn restart_with_snapshot_transfers_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("state.json");
    let work = dir.path().join("work");
    tokio::fs::create_dir_all(&work).await.unwrap();
    tokio::fs::write(work.join("a.txt"), b"stable").await.unwrap();

    let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));
    let channel = Arc::new(channel);

    let mut config = test_config(&work);
    config.sync.index_snapshot = Some(snapshot.clone());

    let mut handle = SyncSession::start(config.clone(), channel.clone()).await.unwrap();
    match handle.next_event().await {
        Some(SessionEvent::InitialSyncComplete { uploaded, .. }) => assert_eq!(uploaded, 1),
        other => panic!("expected InitialSyncComplete, got {other:?}"),
    }
    handle.stop(None).await;
    assert!(snapshot.exists(), "snapshot should persist on stop");

    // Second session over the same remote: both sides already agree, so the
    // initial reconciliation must move nothing.
    let mut handle = SyncSession::start(config, channel).await.unwrap();
    match handle.next_event().await {
        Some(SessionEvent::InitialSyncComplete { uploaded, downloaded }) => {
            assert_eq!(uploaded, 0, "tracked unchanged files must not re-upload");
            assert_eq!(downloaded, 0);
        }
        other => panic!("expected InitialSyncComplete, got {other:?}"),
    }
    assert_eq!(remote.file_content(&rel("/a.txt")).await, Some(b"stable".to_vec()));
    handle.stop(None).await;
}

#[tokio::test]
async fn local_edit_propagates_upstream() {
    let dir = tempfile::tempdir().unwrap();
    let (mut handle, remote) = start_session(test_config(dir.path())).await;
    let _ = handle.next_event().await;

    tokio::fs::write(dir.path().join("notes.txt"), b"first draft")
        .await
        .unwrap();

    wait_until("new file to reach the remote", || async {
        remote.file_content(&rel("/notes.txt")).await == Some(b"first draft".to_vec())
    })
    .await;

    tokio::fs::write(dir.path().join("notes.txt"), b"second draft, longer")
        .await
        .unwrap();

    wait_until("edited content to reach the remote", || async {
        remote.file_content(&rel("/notes.txt")).await == Some(b"second draft, longer".to_vec())
    })
    .await;

    handle.stop(None).await;
}

#[tokio::test]
async fn local_deletion_propagates_upstream() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("doomed.txt"), b"bye").await.unwrap();

    let (mut handle, remote) = start_session(test_config(dir.path())).await;
    let _ = handle.next_event().await;
    assert!(remote.contains(&rel("/doomed.txt")).await);

    tokio::fs::remove_file(dir.path().join("doomed.txt")).await.unwrap();

    wait_until("deletion to reach the remote", || async {
        !remote.contains(&rel("/doomed.txt")).await
    })
    .await;

    handle.stop(None).await;
}

#[tokio::test]
async fn remote_change_propagates_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let (mut handle, remote) = start_session(test_config(dir.path())).await;
    let _ = handle.next_event().await;

    remote
        .put_file(&rel("/config/app.yaml"), b"debug: true".to_vec(), 1_650_000_000)
        .await;

    let local = dir.path().join("config/app.yaml");
    wait_until("remote file to appear locally", || async {
        tokio::fs::read(&local).await.ok() == Some(b"debug: true".to_vec())
    })
    .await;

    handle.stop(None).await;
}

#[tokio::test]
async fn remote_deletion_propagates_downstream() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("shared.txt"), b"shared").await.unwrap();

    let (mut handle, remote) = start_session(test_config(dir.path())).await;
    let _ = handle.next_event().await;
    assert!(remote.contains(&rel("/shared.txt")).await);

    remote.remove(&rel("/shared.txt")).await;

    let local = dir.path().join("shared.txt");
    wait_until("remote deletion to remove the local file", || async {
        tokio::fs::try_exists(&local).await.ok() == Some(false)
    })
    .await;

    handle.stop(None).await;
}

#[tokio::test]
async fn ignored_paths_never_sync() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("app.rs"), b"code").await.unwrap();
    tokio::fs::write(dir.path().join("trace.log"), b"noise").await.unwrap();

    let mut config = test_config(dir.path());
    config.ignore.patterns = vec!["*.log".into()];

    let (channel, remote) = MemoryRemote::pair(Duration::from_secs(5));
    let mut handle = SyncSession::start(config, Arc::new(channel)).await.unwrap();
    match handle.next_event().await {
        Some(SessionEvent::InitialSyncComplete { uploaded, .. }) => assert_eq!(uploaded, 1),
        other => panic!("expected InitialSyncComplete, got {other:?}"),
    }

    assert!(remote.contains(&rel("/app.rs")).await);
    assert!(!remote.contains(&rel("/trace.log")).await);

    handle.stop(None).await;
}

#[tokio::test]
async fn transport_failure_is_fatal_and_observable() {
    let dir = tempfile::tempdir().unwrap();
    let (mut handle, remote) = start_session(test_config(dir.path())).await;
    let _ = handle.next_event().await;

    // Kill the remote endpoint; the next poll must escalate to a fatal
    // session failure rather than silently stalling.
    drop(remote);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        match tokio::time::timeout_at(deadline, handle.next_event()).await {
            Ok(Some(SessionEvent::Fatal(message))) => {
                assert!(!message.is_empty());
                break;
            }
            Ok(Some(_other)) => continue,
            Ok(None) => panic!("status channel closed without a Fatal event"),
            Err(_) => panic!("timed out waiting for the Fatal event"),
        }
    }
    assert!(handle.is_stopping());

    handle.stop(Some("transport failure observed".into())).await;
}
