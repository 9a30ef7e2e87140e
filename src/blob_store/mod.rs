//! BlobContainer adapter.
//!
//! A uniform key/value+stream interface over whatever object store backs a
//! repository. There is no inheritance chain here, just one trait object
//! that every storage backend implements. All operations are blocking;
//! callers run them on a designated I/O pool.

pub mod fs;

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use anyhow::Result;

/// Metadata `list_blobs_by_prefix` returns per entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobMetadata {
    pub length: u64,
}

/// Outcome of a listing call. Some backends (plain URL/read-only stores)
/// cannot enumerate their own contents; callers must have a fallback (see
/// [`crate::catalog::repository_index::RepositoryIndex::get_repository_data`]).
pub enum ListResult {
    Entries(BTreeMap<String, BlobMetadata>),
    Unsupported,
}

/// Uniform interface over an object store "directory". A repository is
/// built from several containers rooted at different paths (the repository
/// root, `indices/<id>/`, `indices/<id>/<shard>/`).
pub trait BlobContainer: Send + Sync {
    fn read_blob(&self, name: &str) -> Result<Box<dyn Read + Send>>;

    /// Writes `length` bytes read from `data`. If `fail_if_exists` is true
    /// and the blob already exists, this must fail without touching it.
    fn write_blob(
        &self,
        name: &str,
        data: &mut dyn Read,
        length: u64,
        fail_if_exists: bool,
    ) -> Result<()>;

    /// Same contract as `write_blob`, but durable-on-success /
    /// absent-on-failure: no partial blob is ever visible to a reader.
    fn write_blob_atomic(
        &self,
        name: &str,
        data: &mut dyn Read,
        length: u64,
        fail_if_exists: bool,
    ) -> Result<()>;

    /// May return `Unsupported` on read-only/URL-style stores.
    fn list_blobs_by_prefix(&self, prefix: &str) -> Result<ListResult>;

    fn delete_blob_ignore_missing(&self, name: &str) -> Result<()>;

    fn delete_blobs_ignore_missing(&self, names: &[String]) -> Result<()> {
        for name in names {
            self.delete_blob_ignore_missing(name)?;
        }
        Ok(())
    }

    fn blob_exists(&self, name: &str) -> Result<bool>;

    /// Recursively removes the directory this container addresses, ignoring
    /// a missing target. Used to clean up now-empty index directories.
    fn delete_container(&self) -> Result<()>;

    /// Creates (or opens) a sub-container rooted at `relative`, e.g.
    /// `indices/<id>` or `<shard>` underneath it.
    fn child(&self, relative: &str) -> Result<Arc<dyn BlobContainer>>;

    /// Releases whatever resources back this container. Most backends have
    /// nothing to release and keep the default no-op; [`Repository::close`]
    /// guarantees this is still only ever called once.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
