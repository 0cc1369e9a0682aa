//! devsync Engine - Bidirectional synchronization engine
//!
//! Keeps a local project directory continuously mirrored into a remote
//! container filesystem reachable through a narrow exec/stream channel.
//!
//! Provides:
//! - The authoritative file-state index
//! - The four transfer/deletion decision predicates
//! - Upstream and downstream transfer pipelines
//! - Initial reconciliation and steady-state watching
//! - Per-direction bandwidth throttling
//!
//! ## Modules
//!
//! - [`session`] - Top-level orchestrator owning the sync lifecycle
//! - [`index`] - Mutex-guarded path → record map, the one shared state
//! - [`evaluate`] - Decision predicates combining index, matchers and stats
//! - [`upstream`] / [`downstream`] - Transfer pipelines per direction
//! - [`reconcile`] - One-time full-tree comparison at session start
//! - [`watcher`] - Local change collection with per-path debouncing
//! - [`throttle`] - Token-bucket byte throttle
//! - [`filesystem`] - Local filesystem adapter

pub mod downstream;
pub mod evaluate;
pub mod filesystem;
pub mod ignore;
pub mod index;
pub mod reconcile;
pub mod session;
pub mod throttle;
pub mod upstream;
pub mod watcher;

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured local root is missing or not a directory
    #[error("Invalid sync root: {0}")]
    InvalidRoot(PathBuf),

    /// The configuration failed validation at session construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The remote channel failed; fatal to the session
    #[error("Transport failure: {0}")]
    Transport(#[from] devsync_core::ports::TransportError),

    /// A domain-level error propagated from devsync-core
    #[error("Domain error: {0}")]
    Domain(#[from] devsync_core::domain::DomainError),
}
