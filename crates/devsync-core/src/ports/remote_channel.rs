//! Remote channel port (driven/secondary port)
//!
//! The sync engine reaches the remote container filesystem exclusively
//! through this trait. The collaborator behind it owns session
//! establishment, authentication and the exact byte framing; the engine
//! only requires the four message shapes below and at-least-once delivery
//! with idempotent re-application (a duplicated change notification must
//! re-confirm, never corrupt, an earlier decision).
//!
//! ## Design Notes
//!
//! - Errors use [`TransportError`] rather than `anyhow` because the session
//!   must distinguish transport failure (fatal, stops the session) from
//!   per-file trouble (logged, retried next cycle).
//! - Uploads carry the target mtime so the remote side can apply it and the
//!   next change listing reports the value already committed to the index.

use crate::domain::{RelativePath, RemoteChange};

/// Errors crossing the transport boundary.
///
/// `Timeout`, `ConnectionLost` and `Protocol` are fatal to the session that
/// observes them. `Remote` is an in-band, per-path failure (the remote
/// filesystem rejected one operation); pipelines skip the affected path and
/// keep the session alive.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An operation did not complete within its deadline
    #[error("Transport timeout during {0}")]
    Timeout(&'static str),

    /// The underlying stream closed or failed
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The peer sent a frame we could not understand
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The remote endpoint rejected this one operation
    #[error("Remote error: {0}")]
    Remote(String),
}

impl TransportError {
    /// Whether this error terminates the session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Remote(_))
    }
}

/// Port trait for the multiplexed remote channel.
///
/// Implementations must be safe to call from multiple transfer workers
/// concurrently; logical operations may interleave on the wire.
#[async_trait::async_trait]
pub trait IRemoteChannel: Send + Sync {
    /// Request the batch of changes observed since the previous call.
    ///
    /// The first call on a fresh session returns the full remote tree.
    async fn list_changes(&self) -> Result<Vec<RemoteChange>, TransportError>;

    /// Stream a file's content to `path` on the remote side, applying `mtime`.
    async fn upload(
        &self,
        path: &RelativePath,
        mtime: i64,
        data: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Fetch the content of the remote file at `path`.
    async fn download(&self, path: &RelativePath) -> Result<Vec<u8>, TransportError>;

    /// Create a directory (and missing parents) on the remote side.
    async fn create_directory(&self, path: &RelativePath, mtime: i64)
        -> Result<(), TransportError>;

    /// Delete a file or directory tree on the remote side.
    ///
    /// Deleting a path that no longer exists is not an error.
    async fn delete(&self, path: &RelativePath) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_remote_errors_are_non_fatal() {
        assert!(TransportError::Timeout("op").is_fatal());
        assert!(TransportError::ConnectionLost("eof".into()).is_fatal());
        assert!(TransportError::Protocol("bad frame".into()).is_fatal());
        assert!(!TransportError::Remote("no such file".into()).is_fatal());
    }
}
