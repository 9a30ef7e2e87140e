//! Shard snapshot catalog: per-(index, shard) map of physical-file ->
//! data-blob across all snapshots sharing that shard.
//!
//! Read policy: if a readable `index-<gen>` exists, it is authoritative --
//! never cross-check against `snap-*` blobs. If no `index-<gen>` exists but
//! `snap-*.dat` commit points do, rebuild the catalog from them. This is a
//! recovery-only path with undefined behavior under concurrent writers, so
//! callers must only invoke it single-writer.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blob_store::{BlobContainer, ListResult};
use crate::codec::{self, CodecKind};
use crate::error::{RepositoryError, Result};
use crate::model::FileInfo;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommitPoint {
    pub snapshot_name: String,
    pub snapshot_uuid: Uuid,
    pub files: Vec<FileInfo>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShardCatalog {
    pub commit_points: Vec<CommitPoint>,
}

impl ShardCatalog {
    pub fn has_snapshot(&self, name: &str) -> bool {
        self.commit_points.iter().any(|c| c.snapshot_name == name)
    }

    /// All `FileInfo`s sharing `physical_name`, so a caller can pick one by
    /// (length, checksum) via `FileInfo::is_same_content`.
    pub fn find_physical<'a>(&'a self, physical_name: &str) -> Vec<&'a FileInfo> {
        self.commit_points
            .iter()
            .flat_map(|c| c.files.iter())
            .filter(|f| f.physical_name == physical_name)
            .collect()
    }

    /// `None` iff the logical blob name is unreferenced by any commit point.
    pub fn find_name_file(&self, logical_name: &str) -> Option<&FileInfo> {
        self.commit_points
            .iter()
            .flat_map(|c| c.files.iter())
            .find(|f| f.name == logical_name)
    }

    pub fn referenced_blob_names(&self) -> HashSet<String> {
        self.commit_points
            .iter()
            .flat_map(|c| c.files.iter())
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn without_snapshot(&self, uuid: Uuid) -> Self {
        Self {
            commit_points: self
                .commit_points
                .iter()
                .filter(|c| c.snapshot_uuid != uuid)
                .cloned()
                .collect(),
        }
    }
}

pub struct ShardCatalogStore {
    container: Arc<dyn BlobContainer>,
}

impl ShardCatalogStore {
    pub fn new(container: Arc<dyn BlobContainer>) -> Self {
        Self { container }
    }

    fn latest_generation(&self) -> Result<Option<u64>> {
        match self
            .container
            .list_blobs_by_prefix("index-")
            .map_err(|e| RepositoryError::repository("shard-catalog", e))?
        {
            ListResult::Entries(entries) => Ok(entries
                .keys()
                .filter_map(|name| name.strip_prefix("index-"))
                .filter_map(|suffix| suffix.parse::<u64>().ok())
                .max()),
            ListResult::Unsupported => Ok(None),
        }
    }

    fn list_commit_points(&self) -> Result<Vec<String>> {
        match self
            .container
            .list_blobs_by_prefix("snap-")
            .map_err(|e| RepositoryError::repository("shard-catalog", e))?
        {
            ListResult::Entries(entries) => Ok(entries.into_keys().collect()),
            ListResult::Unsupported => Ok(Vec::new()),
        }
    }

    /// Reads the catalog, rebuilding from individual commit points when no
    /// `index-<gen>` blob exists yet.
    pub fn read(&self) -> Result<(Option<u64>, ShardCatalog)> {
        if let Some(gen) = self.latest_generation()? {
            let blob_name = format!("index-{}", gen);
            let mut reader = self
                .container
                .read_blob(&blob_name)
                .map_err(|e| RepositoryError::repository("shard-catalog", e))?;
            let catalog: ShardCatalog = codec::decode_from(&mut reader, CodecKind::ShardCatalog)?;
            return Ok((Some(gen), catalog));
        }

        let mut commit_points = Vec::new();
        for name in self.list_commit_points()? {
            let mut reader = self
                .container
                .read_blob(&name)
                .map_err(|e| RepositoryError::repository("shard-catalog", e))?;
            let point: CommitPoint =
                codec::decode_from(&mut reader, CodecKind::ShardCommitPoint)?;
            commit_points.push(point);
        }
        Ok((None, ShardCatalog { commit_points }))
    }

    pub fn write(&self, catalog: &ShardCatalog, expected_gen: Option<u64>) -> Result<u64> {
        let current = self.latest_generation()?;
        if current != expected_gen {
            return Err(RepositoryError::ConcurrentModification {
                expected: expected_gen,
                found: current,
            });
        }
        let new_gen = current.map_or(0, |n| n + 1);
        let bytes = codec::encode(CodecKind::ShardCatalog, catalog, true)?;
        let blob_name = format!("index-{}", new_gen);
        self.container
            .write_blob_atomic(&blob_name, &mut &bytes[..], bytes.len() as u64, true)
            .map_err(|_| RepositoryError::ConcurrentModification {
                expected: expected_gen,
                found: Some(new_gen),
            })?;

        if new_gen >= 1 {
            let stale = format!("index-{}", new_gen - 1);
            if let Err(err) = self.container.delete_blob_ignore_missing(&stale) {
                log::warn!("failed to delete stale shard generation {}: {:#}", stale, err);
            }
        }
        Ok(new_gen)
    }

    pub fn container(&self) -> &Arc<dyn BlobContainer> {
        &self.container
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::fs::FsBlobContainer;

    fn container() -> Arc<dyn BlobContainer> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(FsBlobContainer::new(dir.path().join("shard")).unwrap())
    }

    fn file(name: &str, physical: &str, length: u64, checksum: u32) -> FileInfo {
        FileInfo {
            name: name.into(),
            physical_name: physical.into(),
            length,
            checksum,
            part_size: 4096,
        }
    }

    #[test]
    fn dedup_reuses_matching_physical_file() {
        let mut catalog = ShardCatalog::default();
        catalog.commit_points.push(CommitPoint {
            snapshot_name: "s1".into(),
            snapshot_uuid: Uuid::new_v4(),
            files: vec![file("__a", "a.si", 100, 7)],
        });
        let matches = catalog.find_physical("a.si");
        assert_eq!(matches.len(), 1);
        assert!(matches[0].is_same_content(&file("__other", "a.si", 100, 7)));
    }

    #[test]
    fn rebuilds_from_commit_points_when_no_generation_exists() {
        let container = container();
        let point = CommitPoint {
            snapshot_name: "s1".into(),
            snapshot_uuid: Uuid::new_v4(),
            files: vec![file("__a", "a.si", 10, 1)],
        };
        let bytes = codec::encode(CodecKind::ShardCommitPoint, &point, false).unwrap();
        container
            .write_blob(
                &format!("snap-{}.dat", point.snapshot_uuid),
                &mut &bytes[..],
                bytes.len() as u64,
                false,
            )
            .unwrap();

        let store = ShardCatalogStore::new(container);
        let (gen, catalog) = store.read().unwrap();
        assert_eq!(gen, None);
        assert_eq!(catalog.commit_points.len(), 1);
    }

    #[test]
    fn existing_generation_is_authoritative_over_stray_commit_points() {
        let container = container();
        let store = ShardCatalogStore::new(container.clone());
        let new_gen = store.write(&ShardCatalog::default(), None).unwrap();
        assert_eq!(new_gen, 0);

        // a stray commit point with no catalog reference must not resurrect
        let stray = CommitPoint {
            snapshot_name: "ghost".into(),
            snapshot_uuid: Uuid::new_v4(),
            files: vec![],
        };
        let bytes = codec::encode(CodecKind::ShardCommitPoint, &stray, false).unwrap();
        container
            .write_blob(
                &format!("snap-{}.dat", stray.snapshot_uuid),
                &mut &bytes[..],
                bytes.len() as u64,
                false,
            )
            .unwrap();

        let (gen, catalog) = store.read().unwrap();
        assert_eq!(gen, Some(0));
        assert!(catalog.commit_points.is_empty());
    }
}
