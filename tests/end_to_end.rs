//! End-to-end scenarios exercising the public API against a real
//! filesystem-backed blob store: fresh and incremental snapshots, a
//! concurrent-finalize race, cooperative cancellation, a corrupted catalog
//! generation, and read-only mode.

use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use snapshot_repository::blob_store::fs::FsBlobContainer;
use snapshot_repository::blob_store::BlobContainer;
use snapshot_repository::catalog::repository_index::RepositoryIndex;
use snapshot_repository::catalog::shard_catalog::ShardCatalogStore;
use snapshot_repository::catalog::RepositoryData;
use snapshot_repository::codec::{self, CodecKind};
use snapshot_repository::error::RepositoryError;
use snapshot_repository::model::{
    IndexId, IndexShardSnapshotStatus, SnapshotId, SnapshotState,
};
use snapshot_repository::snapshot::{LocalFileMeta, LocalShardStore, SnapshotCreator};
use snapshot_repository::{Repository, RepositorySettings};

fn enable_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fresh_container(label: &str) -> Arc<dyn BlobContainer> {
    enable_logging();
    let dir = tempfile::tempdir().unwrap();
    Arc::new(FsBlobContainer::new(dir.path().join(label)).unwrap())
}

struct MemoryShardStore {
    files: Vec<(String, Vec<u8>)>,
}

impl LocalShardStore for MemoryShardStore {
    fn list_files(&self) -> anyhow::Result<Vec<LocalFileMeta>> {
        Ok(self
            .files
            .iter()
            .map(|(name, data)| LocalFileMeta {
                name: name.clone(),
                length: data.len() as u64,
                checksum: crc32fast::hash(data),
            })
            .collect())
    }

    fn open_verifying_input(&self, name: &str) -> anyhow::Result<Box<dyn Read + Send>> {
        let data = self
            .files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| anyhow::anyhow!("no such local file '{name}'"))?;
        Ok(Box::new(Cursor::new(data)))
    }
}

/// Aborts the shared status once more than `threshold` bytes of this file
/// have been streamed -- used to model cancellation mid-upload.
struct AbortAfterBytes {
    inner: Cursor<Vec<u8>>,
    status: Arc<IndexShardSnapshotStatus>,
    threshold: u64,
    consumed: AtomicU64,
}

impl Read for AbortAfterBytes {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        let total = self.consumed.fetch_add(n as u64, Ordering::SeqCst) + n as u64;
        if total >= self.threshold {
            self.status.abort();
        }
        Ok(n)
    }
}

struct AbortingShardStore {
    data: Vec<u8>,
    status: Arc<IndexShardSnapshotStatus>,
    threshold: u64,
}

impl LocalShardStore for AbortingShardStore {
    fn list_files(&self) -> anyhow::Result<Vec<LocalFileMeta>> {
        Ok(vec![LocalFileMeta {
            name: "c.si".into(),
            length: self.data.len() as u64,
            checksum: crc32fast::hash(&self.data),
        }])
    }

    fn open_verifying_input(&self, _name: &str) -> anyhow::Result<Box<dyn Read + Send>> {
        Ok(Box::new(AbortAfterBytes {
            inner: Cursor::new(self.data.clone()),
            status: self.status.clone(),
            threshold: self.threshold,
            consumed: AtomicU64::new(0),
        }))
    }
}

#[tokio::test]
async fn fresh_snapshot_uploads_and_splits_large_files() {
    let shard_container = fresh_container("shard");
    let mut settings = RepositorySettings::default();
    settings.chunk_size = 4096;
    let settings = Arc::new(settings);

    let local = Arc::new(MemoryShardStore {
        files: vec![
            ("a.si".into(), vec![1u8; 100]),
            ("b.fdt".into(), vec![2u8; 5000]),
        ],
    });
    let creator = SnapshotCreator::new(shard_container.clone(), local, settings, None);
    let status = Arc::new(IndexShardSnapshotStatus::new());
    let snapshot = SnapshotId::new("daily");
    creator
        .create_shard_snapshot(snapshot.clone(), status)
        .await
        .unwrap();

    assert!(shard_container
        .blob_exists(&format!("snap-{}.dat", snapshot.uuid))
        .unwrap());
    assert!(shard_container.blob_exists("index-0").unwrap());

    let store = ShardCatalogStore::new(shard_container.clone());
    let (gen, catalog) = store.read().unwrap();
    assert_eq!(gen, Some(0));
    let commit = catalog
        .commit_points
        .iter()
        .find(|c| c.snapshot_name == "daily")
        .unwrap();
    assert_eq!(commit.files.len(), 2);

    let b = commit.files.iter().find(|f| f.physical_name == "b.fdt").unwrap();
    assert_eq!(b.num_parts(), 2);
    assert!(shard_container.blob_exists(&format!("{}.part0", b.name)).unwrap());
    assert!(shard_container.blob_exists(&format!("{}.part1", b.name)).unwrap());

    let a = commit.files.iter().find(|f| f.physical_name == "a.si").unwrap();
    assert_eq!(a.num_parts(), 1);
    assert!(shard_container.blob_exists(&a.name).unwrap());
}

#[tokio::test]
async fn incremental_snapshot_reuses_unchanged_files() {
    let shard_container = fresh_container("shard");
    let mut settings = RepositorySettings::default();
    settings.chunk_size = 4096;
    let settings = Arc::new(settings);

    let first_local = Arc::new(MemoryShardStore {
        files: vec![
            ("a.si".into(), vec![1u8; 100]),
            ("b.fdt".into(), vec![2u8; 5000]),
        ],
    });
    let creator = SnapshotCreator::new(shard_container.clone(), first_local, settings.clone(), None);
    creator
        .create_shard_snapshot(SnapshotId::new("daily-1"), Arc::new(IndexShardSnapshotStatus::new()))
        .await
        .unwrap();

    let second_local = Arc::new(MemoryShardStore {
        files: vec![
            ("a.si".into(), vec![1u8; 100]),
            ("b.fdt".into(), vec![3u8; 5000]),
        ],
    });
    let creator = SnapshotCreator::new(shard_container.clone(), second_local, settings, None);
    creator
        .create_shard_snapshot(SnapshotId::new("daily-2"), Arc::new(IndexShardSnapshotStatus::new()))
        .await
        .unwrap();

    let store = ShardCatalogStore::new(shard_container.clone());
    let (gen, catalog) = store.read().unwrap();
    assert_eq!(gen, Some(1));

    let first = catalog
        .commit_points
        .iter()
        .find(|c| c.snapshot_name == "daily-1")
        .unwrap();
    let second = catalog
        .commit_points
        .iter()
        .find(|c| c.snapshot_name == "daily-2")
        .unwrap();

    let a1 = first.files.iter().find(|f| f.physical_name == "a.si").unwrap();
    let a2 = second.files.iter().find(|f| f.physical_name == "a.si").unwrap();
    assert_eq!(a1.name, a2.name, "unchanged file must reuse the same logical blob");

    let b1 = first.files.iter().find(|f| f.physical_name == "b.fdt").unwrap();
    let b2 = second.files.iter().find(|f| f.physical_name == "b.fdt").unwrap();
    assert_ne!(b1.name, b2.name, "changed content must allocate a new logical blob");
}

#[tokio::test]
async fn concurrent_finalize_race_has_exactly_one_winner() {
    let root = fresh_container("repo");
    let repo = Repository::start(root.clone(), RepositorySettings::default()).unwrap();
    let snapshot = repo.initialize_snapshot("daily", vec![]).await.unwrap();

    let index = RepositoryIndex::new(root);
    let (gen, data) = index.get_repository_data().unwrap();
    let updated = data.with_snapshot_state(snapshot.uuid, SnapshotState::Success);

    let first = index.write_index_gen(&updated, gen);
    let second = index.write_index_gen(&updated, gen);
    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(RepositoryError::ConcurrentModification { .. })
    ));
}

#[tokio::test]
async fn cancellation_mid_upload_aborts_and_allows_recovery() {
    let shard_container = fresh_container("shard");
    let mut settings = RepositorySettings::default();
    settings.chunk_size = 1024;
    let settings = Arc::new(settings);

    let status = Arc::new(IndexShardSnapshotStatus::new());
    let local = Arc::new(AbortingShardStore {
        data: vec![9u8; 13 * 1024],
        status: status.clone(),
        threshold: 6 * 1024, // abort takes effect partway through part 5
    });
    let creator = SnapshotCreator::new(shard_container.clone(), local, settings.clone(), None);
    let err = creator
        .create_shard_snapshot(SnapshotId::new("c"), status)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::SnapshotAborted));

    // no commit point was ever written for the aborted attempt
    assert!(ShardCatalogStore::new(shard_container.clone())
        .read()
        .unwrap()
        .1
        .commit_points
        .is_empty());

    // leftover .partN blobs are tolerated; a fresh attempt still succeeds
    let local = Arc::new(MemoryShardStore {
        files: vec![("c.si".into(), vec![9u8; 13 * 1024])],
    });
    let creator = SnapshotCreator::new(shard_container.clone(), local, settings, None);
    creator
        .create_shard_snapshot(SnapshotId::new("c-retry"), Arc::new(IndexShardSnapshotStatus::new()))
        .await
        .unwrap();
}

#[tokio::test]
async fn corrupt_latest_generation_falls_back_to_an_explicit_downgrade_read() {
    let root = fresh_container("repo");
    let repo = Repository::start(root.clone(), RepositorySettings::default()).unwrap();
    repo.initialize_snapshot("s1", vec![]).await.unwrap(); // index-0
    repo.initialize_snapshot("s2", vec![]).await.unwrap(); // index-1, index-0 retained

    root.delete_blob_ignore_missing("index-1").unwrap();
    let garbage = b"not a valid catalog record".to_vec();
    root.write_blob("index-1", &mut Cursor::new(garbage.clone()), garbage.len() as u64, false)
        .unwrap();

    let err = repo.repository_data().await.unwrap_err();
    assert!(matches!(err, RepositoryError::CorruptedRepository { .. }));

    let mut reader = root.read_blob("index-0").unwrap();
    let data: RepositoryData = codec::decode_from(&mut reader, CodecKind::RepositoryCatalog).unwrap();
    assert!(data.snapshots.values().any(|s| s.name == "s1"));
}

#[tokio::test]
async fn readonly_repository_allows_verify_but_rejects_finalize() {
    let mut settings = RepositorySettings::default();
    settings.readonly = true;
    let root = fresh_container("repo");
    let repo = Repository::start(root, settings).unwrap();

    let index_id = IndexId::new("foo");
    let report = repo.verify_shard(&index_id, 0).await.unwrap();
    assert!(report.is_clean());

    let err = repo
        .finalize_snapshot(uuid::Uuid::new_v4(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::ReadOnlyRepository));
}
