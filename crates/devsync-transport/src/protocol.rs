//! Wire protocol: message shapes and frame codec
//!
//! The sync engine needs exactly four logical operations on the wire:
//! change-list queries, uploads tagged with destination path and target
//! mtime, downloads, and delete notifications (directory creation rides
//! along as a fifth, cheap operation). Every message travels as a
//! length-prefixed bincode frame carrying a correlation id, so concurrent
//! logical operations from multiple workers can interleave on one duplex
//! stream without corrupting each other.
//!
//! Wire format per frame:
//!   - 4-byte big-endian payload length (u32)
//!   - that many bytes of bincode payload (a [`Frame`])

use bincode::config;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use devsync_core::domain::{RelativePath, RemoteChange};
use devsync_core::ports::TransportError;

/// Upper bound on a single frame's payload; anything larger is a protocol
/// violation (uploads are bounded by file size, which dev trees keep well
/// under this).
pub const MAX_FRAME_BYTES: u32 = 256 * 1024 * 1024;

// ============================================================================
// Messages
// ============================================================================

/// A request from the sync engine to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Return the batch of changes since the previous query (full tree on
    /// the first query of a session)
    ListChanges,
    /// Replace the file at `path` with `data` and apply `mtime`
    Upload {
        path: RelativePath,
        mtime: i64,
        data: Vec<u8>,
    },
    /// Return the content of the file at `path`
    Download { path: RelativePath },
    /// Create the directory at `path` (and missing parents), apply `mtime`
    Mkdir { path: RelativePath, mtime: i64 },
    /// Remove the file or directory tree at `path`
    Delete { path: RelativePath },
}

/// A response from the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Answer to [`Request::ListChanges`]
    Changes(Vec<RemoteChange>),
    /// Answer to [`Request::Download`]
    Content(Vec<u8>),
    /// Acknowledgement for upload / mkdir / delete
    Done,
    /// The operation failed on the remote side (in-band, not fatal)
    Error(String),
}

/// Envelope correlating a request with its response across interleaved
/// operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame<T> {
    /// Correlation id, chosen by the requesting side
    pub id: u64,
    /// The message payload
    pub body: T,
}

// ============================================================================
// Codec
// ============================================================================

/// Read one length-prefixed bincode frame from `reader`.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Frame<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf);

    if len > MAX_FRAME_BYTES {
        return Err(TransportError::Protocol(format!(
            "frame length {len} exceeds maximum {MAX_FRAME_BYTES}"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;

    let (frame, _consumed): (Frame<T>, usize) =
        bincode::serde::decode_from_slice(&buf, config::standard())
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
    Ok(frame)
}

/// Write one length-prefixed bincode frame to `writer`.
pub async fn write_frame<W, T>(writer: &mut W, frame: &Frame<T>) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = bincode::serde::encode_to_vec(frame, config::standard())
        .map_err(|e| TransportError::Protocol(e.to_string()))?;
    let len: u32 = bytes
        .len()
        .try_into()
        .map_err(|_| TransportError::Protocol("frame too large for u32 length prefix".into()))?;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::Protocol(format!(
            "frame length {len} exceeds maximum {MAX_FRAME_BYTES}"
        )));
    }

    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(s: &str) -> RelativePath {
        RelativePath::new(s).unwrap()
    }

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let sent = Frame {
            id: 7,
            body: Request::Upload {
                path: rel("/src/main.rs"),
                mtime: 1_700_000_000,
                data: b"fn main() {}".to_vec(),
            },
        };
        write_frame(&mut client, &sent).await.unwrap();

        let received: Frame<Request> = read_frame(&mut server).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn multiple_frames_preserve_order_and_ids() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        for id in 0..5u64 {
            write_frame(&mut client, &Frame { id, body: Request::ListChanges })
                .await
                .unwrap();
        }
        for expected in 0..5u64 {
            let frame: Frame<Request> = read_frame(&mut server).await.unwrap();
            assert_eq!(frame.id, expected);
        }
    }

    #[tokio::test]
    async fn response_with_changes_round_trips() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let sent = Frame {
            id: 1,
            body: Response::Changes(vec![RemoteChange {
                path: rel("/a.txt"),
                mtime: 2000,
                size: 120,
                is_directory: false,
                is_delete: false,
            }]),
        };
        write_frame(&mut server, &sent).await.unwrap();
        let received: Frame<Response> = read_frame(&mut client).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn truncated_stream_is_connection_lost() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        // Write only half a length prefix, then close.
        client.write_all(&[0u8, 0u8]).await.unwrap();
        drop(client);

        let mut server = server;
        let result: Result<Frame<Request>, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(TransportError::ConnectionLost(_))));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        client
            .write_all(&u32::MAX.to_be_bytes())
            .await
            .unwrap();

        let result: Result<Frame<Request>, _> = read_frame(&mut server).await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }
}
