//! devsync Core - Domain logic and port definitions
//!
//! This crate contains the dependency-light core of devsync:
//! - **Domain types** - `FileRecord`, `RelativePath`, `RemoteChange`, the
//!   session state machine
//! - **Port definitions** - Traits for adapters: `IRemoteChannel`,
//!   `ILocalFileSystem`
//! - **Configuration** - Typed config with defaults, YAML loading and
//!   one-shot validation
//!
//! # Architecture
//!
//! The engine crate depends on these types and traits only; the transport
//! crate and the local filesystem adapter implement the ports. The domain
//! module contains pure business logic with no I/O.

pub mod config;
pub mod domain;
pub mod ports;
