//! Blob-store-backed snapshot repository engine.
//!
//! A content-addressed, incremental, multi-snapshot archival engine for a
//! distributed search-and-storage cluster: shards write their files into a
//! [`blob_store::BlobContainer`], a generational [`catalog`] tracks what each
//! shard and the repository as a whole currently reference, and
//! [`snapshot`]/[`verify`] build, restore and audit snapshots against that
//! catalog. [`Repository`] is the entry point most callers want.
//!
//! The shape is a thin trait-object abstraction over storage, a checksummed
//! self-describing record format for anything written to it, and blocking
//! I/O bridged onto async call sites with `spawn_blocking` rather than
//! forcing every collaborator to be async.

pub mod blob_store;
pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod rate_limiter;
pub mod repository;
pub mod sliced_stream;
pub mod snapshot;
pub mod verify;

pub use config::RepositorySettings;
pub use error::{RepositoryError, Result};
pub use repository::Repository;
