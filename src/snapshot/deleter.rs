//! Snapshot deleter: removes one snapshot's commit point from a shard
//! catalog and reclaims any data blobs that no remaining commit point
//! references.
//!
//! A logical blob may be a single part or split into `.part<N>` pieces;
//! since a deleted `FileInfo` no longer tells us which, we sweep by prefix
//! instead of reconstructing `part_name`s.

use std::sync::Arc;

use uuid::Uuid;

use crate::blob_store::{BlobContainer, ListResult};
use crate::catalog::shard_catalog::ShardCatalogStore;
use crate::error::{RepositoryError, Result};
use crate::executor::GenericIoPool;

const MAX_CAS_ATTEMPTS: u32 = 10;

pub struct SnapshotDeleter {
    shard_container: Arc<dyn BlobContainer>,
}

impl SnapshotDeleter {
    pub fn new(shard_container: Arc<dyn BlobContainer>) -> Self {
        Self { shard_container }
    }

    /// Returns the number of now-unreferenced logical blobs it reclaimed.
    /// A no-op, returning `0`, if the snapshot was never committed to this
    /// shard (the caller may be sweeping every shard of an index without
    /// knowing which ones the snapshot actually touched).
    pub async fn delete_shard_snapshot(&self, snapshot_uuid: Uuid) -> Result<usize> {
        let shard_container = self.shard_container.clone();
        GenericIoPool::spawn(move || delete_blocking(&shard_container, snapshot_uuid))
            .await
            .map_err(|join_err| {
                RepositoryError::IndexShardDeleteFailed(anyhow::anyhow!(
                    "delete task panicked: {join_err}"
                ))
            })?
    }
}

fn delete_blocking(shard_container: &Arc<dyn BlobContainer>, snapshot_uuid: Uuid) -> Result<usize> {
    crate::executor::assert_on_io_pool();
    let store = ShardCatalogStore::new(shard_container.clone());

    for _attempt in 0..MAX_CAS_ATTEMPTS {
        let (gen, catalog) = store.read()?;
        if !catalog
            .commit_points
            .iter()
            .any(|c| c.snapshot_uuid == snapshot_uuid)
        {
            return Ok(0);
        }

        let before = catalog.referenced_blob_names();
        let updated = catalog.without_snapshot(snapshot_uuid);
        let after = updated.referenced_blob_names();
        let orphaned: Vec<String> = before.difference(&after).cloned().collect();

        match store.write(&updated, gen) {
            Ok(_) => {
                for name in &orphaned {
                    delete_blob_parts(shard_container.as_ref(), name)?;
                }
                return Ok(orphaned.len());
            }
            Err(RepositoryError::ConcurrentModification { .. }) => continue,
            Err(other) => return Err(other),
        }
    }

    Err(RepositoryError::repository(
        "shard-delete",
        anyhow::anyhow!(
            "gave up after {} attempts racing other writers for shard catalog generation",
            MAX_CAS_ATTEMPTS
        ),
    ))
}

fn delete_blob_parts(container: &dyn BlobContainer, logical_name: &str) -> Result<()> {
    container
        .delete_blob_ignore_missing(logical_name)
        .map_err(|e| RepositoryError::repository("shard-delete", e))?;

    let part_prefix = format!("{}.part", logical_name);
    if let ListResult::Entries(entries) = container
        .list_blobs_by_prefix(&part_prefix)
        .map_err(|e| RepositoryError::repository("shard-delete", e))?
    {
        let names: Vec<String> = entries.into_keys().collect();
        container
            .delete_blobs_ignore_missing(&names)
            .map_err(|e| RepositoryError::repository("shard-delete", e))?;
    }
    Ok(())
}
