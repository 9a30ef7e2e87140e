//! Repository index: the generational catalog of all snapshots.
//!
//! `index-<N>` holds the authoritative `RepositoryData`; `index.latest` is a
//! best-effort 8-byte big-endian pointer used only when listing is
//! unsupported. The generation itself is the sole concurrency-control token:
//! there is no distributed lock, just CAS on `expected_gen` enforced by
//! `write_blob_atomic(.., fail_if_exists = true)`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blob_store::{BlobContainer, ListResult};
use crate::codec::{self, CodecKind};
use crate::error::{RepositoryError, Result};
use crate::model::{IndexId, SnapshotId, SnapshotState};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub name: String,
    pub uuid: Uuid,
    pub state: SnapshotState,
}

/// The catalog at generation `N`: every live snapshot id with its state,
/// plus IndexId -> referencing-SnapshotIds. Invariant: any IndexId
/// referenced by a live snapshot appears exactly once.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RepositoryData {
    pub snapshots: BTreeMap<Uuid, SnapshotEntry>,
    pub index_names: BTreeMap<Uuid, String>,
    pub index_snapshots: BTreeMap<Uuid, BTreeSet<Uuid>>,
}

impl RepositoryData {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn name_exists(&self, name: &str) -> bool {
        self.snapshots.values().any(|s| s.name == name)
    }

    pub fn with_snapshot(
        &self,
        snapshot: &SnapshotId,
        state: SnapshotState,
        indices: &[IndexId],
    ) -> Self {
        let mut next = self.clone();
        next.snapshots.insert(
            snapshot.uuid,
            SnapshotEntry {
                name: snapshot.name.clone(),
                uuid: snapshot.uuid,
                state,
            },
        );
        for index in indices {
            next.index_names.insert(index.id, index.name.clone());
            next.index_snapshots
                .entry(index.id)
                .or_default()
                .insert(snapshot.uuid);
        }
        next
    }

    pub fn with_snapshot_state(&self, uuid: Uuid, state: SnapshotState) -> Self {
        let mut next = self.clone();
        if let Some(entry) = next.snapshots.get_mut(&uuid) {
            entry.state = state;
        }
        next
    }

    /// Removes a snapshot and drops any IndexId that it was the last
    /// referencer of, so callers know which shard directories can be swept.
    pub fn without_snapshot(&self, uuid: Uuid) -> (Self, Vec<Uuid>) {
        let mut next = self.clone();
        next.snapshots.remove(&uuid);
        let mut orphaned = Vec::new();
        next.index_snapshots.retain(|index_id, refs| {
            refs.remove(&uuid);
            if refs.is_empty() {
                orphaned.push(*index_id);
                false
            } else {
                true
            }
        });
        for index_id in &orphaned {
            next.index_names.remove(index_id);
        }
        (next, orphaned)
    }
}

pub struct RepositoryIndex {
    container: Arc<dyn BlobContainer>,
}

impl RepositoryIndex {
    pub fn new(container: Arc<dyn BlobContainer>) -> Self {
        Self { container }
    }

    /// Determine the latest generation: first by listing `index-` blobs and
    /// taking the largest numeric suffix, falling back to `index.latest`
    /// when listing is unsupported. Returns `None` for an empty repository.
    fn latest_generation(&self) -> Result<Option<u64>> {
        match self
            .container
            .list_blobs_by_prefix("index-")
            .map_err(|e| RepositoryError::repository("repository-index", e))?
        {
            ListResult::Entries(entries) => {
                let max = entries
                    .keys()
                    .filter_map(|name| name.strip_prefix("index-"))
                    .filter_map(|suffix| suffix.parse::<u64>().ok())
                    .max();
                if max.is_some() {
                    return Ok(max);
                }
                // No index-N blob was ever written; index.latest (if present)
                // is the only other source of truth.
                self.read_latest_pointer()
            }
            ListResult::Unsupported => self.read_latest_pointer(),
        }
    }

    fn read_latest_pointer(&self) -> Result<Option<u64>> {
        if !self
            .container
            .blob_exists("index.latest")
            .map_err(|e| RepositoryError::repository("repository-index", e))?
        {
            return Ok(None);
        }
        let mut reader = self
            .container
            .read_blob("index.latest")
            .map_err(|e| RepositoryError::repository("repository-index", e))?;
        let mut buf = [0u8; 8];
        std::io::Read::read_exact(&mut reader, &mut buf)
            .map_err(|e| RepositoryError::repository("repository-index", e.into()))?;
        Ok(Some(u64::from_be_bytes(buf)))
    }

    pub fn get_repository_data(&self) -> Result<(Option<u64>, RepositoryData)> {
        let generation = self.latest_generation()?;
        let generation = match generation {
            None => return Ok((None, RepositoryData::empty())),
            Some(n) => n,
        };
        let blob_name = format!("index-{}", generation);
        let mut reader = self
            .container
            .read_blob(&blob_name)
            .map_err(|e| RepositoryError::repository("repository-index", e))?;
        let data: RepositoryData = codec::decode_from(&mut reader, CodecKind::RepositoryCatalog)?;
        Ok((Some(generation), data))
    }

    /// Optimistic CAS write: fails with `ConcurrentModification` if the
    /// observed latest generation has moved since the caller last read it.
    pub fn write_index_gen(
        &self,
        data: &RepositoryData,
        expected_gen: Option<u64>,
    ) -> Result<u64> {
        let current = self.latest_generation()?;
        if current != expected_gen {
            return Err(RepositoryError::ConcurrentModification {
                expected: expected_gen,
                found: current,
            });
        }

        let new_gen = current.map_or(0, |n| n + 1);
        let bytes = codec::encode(CodecKind::RepositoryCatalog, data, true)?;
        let blob_name = format!("index-{}", new_gen);
        self.container
            .write_blob_atomic(
                &blob_name,
                &mut &bytes[..],
                bytes.len() as u64,
                true,
            )
            .map_err(|_| RepositoryError::ConcurrentModification {
                expected: expected_gen,
                found: Some(new_gen),
            })?;

        let pointer = new_gen.to_be_bytes();
        if let Err(err) =
            self.container
                .write_blob_atomic("index.latest", &mut &pointer[..], 8, false)
        {
            log::warn!("failed to update index.latest pointer: {:#}", err);
        }

        // Retain one prior generation for a one-step rollback; best-effort.
        if new_gen >= 2 {
            let stale = format!("index-{}", new_gen - 2);
            if let Err(err) = self.container.delete_blob_ignore_missing(&stale) {
                log::warn!("failed to delete stale generation {}: {:#}", stale, err);
            }
        }

        Ok(new_gen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::fs::FsBlobContainer;

    fn container() -> Arc<dyn BlobContainer> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(FsBlobContainer::new(dir.path().join("repo")).unwrap())
    }

    #[test]
    fn empty_repository_has_no_generation() {
        let index = RepositoryIndex::new(container());
        let (gen, data) = index.get_repository_data().unwrap();
        assert_eq!(gen, None);
        assert!(data.snapshots.is_empty());
    }

    #[test]
    fn first_write_lands_at_generation_zero() {
        let index = RepositoryIndex::new(container());
        let new_gen = index.write_index_gen(&RepositoryData::empty(), None).unwrap();
        assert_eq!(new_gen, 0);
        let (gen, _) = index.get_repository_data().unwrap();
        assert_eq!(gen, Some(0));
    }

    #[test]
    fn concurrent_writers_only_one_succeeds() {
        let index = RepositoryIndex::new(container());
        index.write_index_gen(&RepositoryData::empty(), None).unwrap();

        let snapshot = SnapshotId::new("a");
        let updated = RepositoryData::empty().with_snapshot(&snapshot, SnapshotState::Success, &[]);

        // Both writers observed generation 0.
        let first = index.write_index_gen(&updated, Some(0));
        let second = index.write_index_gen(&updated, Some(0));
        assert!(first.is_ok());
        assert!(matches!(
            second,
            Err(RepositoryError::ConcurrentModification { .. })
        ));
    }

    #[test]
    fn stale_generation_is_pruned_after_two_writes() {
        let index = RepositoryIndex::new(container());
        let gen0 = index.write_index_gen(&RepositoryData::empty(), None).unwrap();
        let gen1 = index
            .write_index_gen(&RepositoryData::empty(), Some(gen0))
            .unwrap();
        let _gen2 = index
            .write_index_gen(&RepositoryData::empty(), Some(gen1))
            .unwrap();
        assert!(!index.container.blob_exists("index-0").unwrap());
        assert!(index.container.blob_exists("index-1").unwrap());
    }
}
