//! devsync Transport - Framed multiplexed remote channel
//!
//! Implements the [`IRemoteChannel`](devsync_core::ports::IRemoteChannel)
//! port over any duplex byte stream: length-prefixed bincode frames with
//! per-request correlation ids, so concurrent logical operations interleave
//! safely on one stream.
//!
//! ## Modules
//!
//! - [`protocol`] - Message shapes and the frame codec
//! - [`channel`] - The multiplexing client, [`RemoteChannel`]
//! - [`memory`] - In-process remote endpoint used by integration tests
//!
//! Session establishment and authentication for real remotes are owned by
//! the caller, which hands an already-connected stream to
//! [`RemoteChannel::new`].

pub mod channel;
pub mod memory;
pub mod protocol;

pub use channel::RemoteChannel;
pub use memory::{MemoryRemote, MemoryRemoteHandle};
