//! Top-level repository engine: owns the root blob container and the
//! repository-level generational index, and hands out the per-shard
//! collaborators needed to create, delete, restore and verify one shard at
//! a time. Which indices/shards a snapshot actually spans is the caller's
//! business -- this crate only knows how to address them once told.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use rand::Rng;
use uuid::Uuid;

use crate::blob_store::BlobContainer;
use crate::catalog::repository_index::{RepositoryData, RepositoryIndex};
use crate::codec::{self, CodecKind};
use crate::config::RepositorySettings;
use crate::error::{RepositoryError, Result};
use crate::executor::GenericIoPool;
use crate::model::{GlobalMetadata, IndexId, IndexMetadata, SnapshotId, SnapshotInfo, SnapshotState};
use crate::rate_limiter::RateLimiter;
use crate::snapshot::{LocalRestoreTarget, LocalShardStore, RestoreEngine, SnapshotCreator, SnapshotDeleter};
use crate::verify::{ShardVerificationReport, VerificationProbe};

const MAX_CAS_ATTEMPTS: u32 = 10;

/// Returned by [`Repository::start_verification`] when the repository is
/// read-only: no probe blobs are written, a smoke read stands in for them.
pub const READONLY_VERIFICATION_SEED: &str = "read-only";

pub struct Repository {
    root: Arc<dyn BlobContainer>,
    settings: Arc<RepositorySettings>,
    upload_limiter: Option<Arc<RateLimiter>>,
    restore_limiter: Option<Arc<RateLimiter>>,
    closed: Mutex<bool>,
}

impl Repository {
    /// Validates `settings` and opens the repository rooted at `root`. No
    /// blob I/O happens here -- the generational index is read lazily, the
    /// first time a caller actually needs it.
    pub fn start(root: Arc<dyn BlobContainer>, settings: RepositorySettings) -> Result<Self> {
        settings
            .validate()
            .map_err(|err| RepositoryError::repository("repository", err))?;
        let settings = Arc::new(settings);
        let upload_limiter = RateLimiter::new(settings.max_snapshot_bytes_per_sec).map(Arc::new);
        let restore_limiter = RateLimiter::new(settings.max_restore_bytes_per_sec).map(Arc::new);
        Ok(Self {
            root,
            settings,
            upload_limiter,
            restore_limiter,
            closed: Mutex::new(false),
        })
    }

    pub fn settings(&self) -> &RepositorySettings {
        &self.settings
    }

    pub fn index_container(&self, index: &IndexId) -> Result<Arc<dyn BlobContainer>> {
        self.root
            .child(&format!("indices/{}", index.id))
            .map_err(|err| RepositoryError::repository("repository", err))
    }

    pub fn shard_container(&self, index: &IndexId, shard: u32) -> Result<Arc<dyn BlobContainer>> {
        self.index_container(index)?
            .child(&shard.to_string())
            .map_err(|err| RepositoryError::repository("repository", err))
    }

    fn repository_index(&self) -> RepositoryIndex {
        RepositoryIndex::new(self.root.clone())
    }

    /// Registers a new snapshot as `InProgress` in the repository-level
    /// catalog, retrying the optimistic-concurrency write against whatever
    /// generation another writer just landed. There is no distributed lock,
    /// just CAS. Once the registration wins, writes the global cluster
    /// metadata blob and one per-index metadata blob -- both best-effort
    /// idempotent, so a caller that retries this call after a crash doesn't
    /// need to special-case "already written".
    pub async fn initialize_snapshot(
        &self,
        name: impl Into<String>,
        indices: Vec<IndexId>,
    ) -> Result<SnapshotId> {
        if self.settings.readonly {
            return Err(RepositoryError::ReadOnlyRepository);
        }
        let name = name.into();
        let snapshot = SnapshotId::new(name.clone());
        let index = self.repository_index();
        let root = self.root.clone();
        let compress = self.settings.compress;

        GenericIoPool::spawn(move || {
            crate::executor::assert_on_io_pool();
            for _attempt in 0..MAX_CAS_ATTEMPTS {
                let (gen, data) = index.get_repository_data()?;
                if data.name_exists(&name) {
                    return Err(RepositoryError::InvalidSnapshotName(name));
                }
                let updated = data.with_snapshot(&snapshot, SnapshotState::InProgress, &indices);
                match index.write_index_gen(&updated, gen) {
                    Ok(_) => {
                        write_global_metadata(root.as_ref(), &snapshot, &indices, compress)?;
                        for index_id in &indices {
                            write_index_metadata(root.as_ref(), index_id, &snapshot, compress)?;
                        }
                        return Ok(snapshot.clone());
                    }
                    Err(RepositoryError::ConcurrentModification { .. }) => continue,
                    Err(other) => return Err(other),
                }
            }
            Err(RepositoryError::ConcurrentModification {
                expected: None,
                found: None,
            })
        })
        .await
        .map_err(|join_err| {
            RepositoryError::repository("repository", anyhow::anyhow!("blocking task panicked: {join_err}"))
        })?
    }

    /// Moves a registered snapshot to a terminal state once every shard has
    /// reported in: per-shard outcomes feed one repository-level verdict,
    /// any shard failure makes the whole snapshot `Partial`. Once the state
    /// transition wins, writes the root-level `SnapshotInfo` blob recording
    /// that outcome.
    pub async fn finalize_snapshot(&self, uuid: uuid::Uuid, all_shards_ok: bool) -> Result<()> {
        if self.settings.readonly {
            return Err(RepositoryError::ReadOnlyRepository);
        }
        let index = self.repository_index();
        let root = self.root.clone();
        let compress = self.settings.compress;
        let state = if all_shards_ok {
            SnapshotState::Success
        } else {
            SnapshotState::Partial
        };

        GenericIoPool::spawn(move || {
            crate::executor::assert_on_io_pool();
            for _attempt in 0..MAX_CAS_ATTEMPTS {
                let (gen, data) = index.get_repository_data()?;
                let updated = data.with_snapshot_state(uuid, state);
                match index.write_index_gen(&updated, gen) {
                    Ok(_) => {
                        let name = updated
                            .snapshots
                            .get(&uuid)
                            .map(|entry| entry.name.clone())
                            .unwrap_or_default();
                        let index_ids: Vec<Uuid> = updated
                            .index_snapshots
                            .iter()
                            .filter(|(_, refs)| refs.contains(&uuid))
                            .map(|(id, _)| *id)
                            .collect();
                        let info = SnapshotInfo {
                            name,
                            uuid,
                            state,
                            index_ids,
                        };
                        return write_snapshot_info(root.as_ref(), &info, compress);
                    }
                    Err(RepositoryError::ConcurrentModification { .. }) => continue,
                    Err(other) => return Err(other),
                }
            }
            Err(RepositoryError::ConcurrentModification {
                expected: None,
                found: None,
            })
        })
        .await
        .map_err(|join_err| {
            RepositoryError::repository("repository", anyhow::anyhow!("blocking task panicked: {join_err}"))
        })?
    }

    /// Removes a snapshot's repository-level registration and its commit
    /// point from every shard of every index it touched, then reclaims any
    /// index left with no other live referencer. Reads the root
    /// `SnapshotInfo` blob for provenance before touching anything (purely
    /// informational -- a missing or corrupt blob never stops the delete),
    /// and once the registration is gone, best-effort deletes the root
    /// metadata and snapshot-info blobs.
    pub async fn delete_snapshot(&self, uuid: uuid::Uuid, shards_per_index: u32) -> Result<()> {
        if self.settings.readonly {
            return Err(RepositoryError::ReadOnlyRepository);
        }

        let provenance = {
            let root = self.root.clone();
            GenericIoPool::spawn(move || {
                crate::executor::assert_on_io_pool();
                read_snapshot_info_best_effort(root.as_ref(), uuid)
            })
            .await
            .unwrap_or(None)
        };
        if let Some(info) = &provenance {
            debug!(
                "deleting snapshot '{}' ({}), last recorded state {:?}",
                info.name, uuid, info.state
            );
        }

        let (orphaned_indices, index_names) = {
            let index = RepositoryIndex::new(self.root.clone());
            GenericIoPool::spawn(move || {
                crate::executor::assert_on_io_pool();
                for _attempt in 0..MAX_CAS_ATTEMPTS {
                    let (gen, data) = index.get_repository_data()?;
                    let entry_indices: Vec<uuid::Uuid> = data
                        .index_snapshots
                        .iter()
                        .filter(|(_, refs)| refs.contains(&uuid))
                        .map(|(id, _)| *id)
                        .collect();
                    let (updated, orphaned) = data.without_snapshot(uuid);
                    let names: Vec<(uuid::Uuid, String)> = entry_indices
                        .iter()
                        .filter_map(|id| data.index_names.get(id).map(|n| (*id, n.clone())))
                        .collect();
                    match index.write_index_gen(&updated, gen) {
                        Ok(_) => return Ok((orphaned, names)),
                        Err(RepositoryError::ConcurrentModification { .. }) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Err(RepositoryError::ConcurrentModification {
                    expected: None,
                    found: None,
                })
            })
            .await
            .map_err(|join_err| {
                RepositoryError::repository("repository", anyhow::anyhow!("blocking task panicked: {join_err}"))
            })??
        };

        {
            let root = self.root.clone();
            GenericIoPool::spawn(move || {
                crate::executor::assert_on_io_pool();
                root.delete_blob_ignore_missing(&format!("meta-{}.dat", uuid))
                    .and_then(|_| root.delete_blob_ignore_missing(&format!("snap-{}.dat", uuid)))
                    .map_err(|err| RepositoryError::repository("repository", err))
            })
            .await
            .map_err(|join_err| {
                RepositoryError::repository("repository", anyhow::anyhow!("blocking task panicked: {join_err}"))
            })??;
        }

        for (id, name) in &index_names {
            let index_id = IndexId {
                name: name.clone(),
                id: *id,
            };
            for shard in 0..shards_per_index {
                let shard_container = self.shard_container(&index_id, shard)?;
                let deleter = SnapshotDeleter::new(shard_container);
                deleter.delete_shard_snapshot(uuid).await?;
            }
        }

        for id in orphaned_indices {
            let container = self
                .root
                .child(&format!("indices/{}", id))
                .map_err(|err| RepositoryError::repository("repository", err))?;
            if let Err(err) = container.delete_container() {
                warn!("failed to reclaim orphaned index directory {}: {:#}", id, err);
            }
        }

        Ok(())
    }

    /// Opens a verification round. A read-only repository never writes: it
    /// only smoke-reads the repository index and returns
    /// [`READONLY_VERIFICATION_SEED`]. Otherwise it allocates a fresh seed,
    /// writes a random `master.dat` blob under `verify-<seed>/`, and returns
    /// the seed every subsequent [`Repository::verify`] call must present.
    pub async fn start_verification(&self) -> Result<String> {
        if self.settings.readonly {
            let root = self.root.clone();
            GenericIoPool::spawn(move || {
                crate::executor::assert_on_io_pool();
                RepositoryIndex::new(root)
                    .get_repository_data()
                    .map(|_| ())
                    .map_err(|err| RepositoryError::Verification {
                        path: "index".into(),
                        reason: err.to_string(),
                    })
            })
            .await
            .map_err(|join_err| {
                RepositoryError::repository("repository", anyhow::anyhow!("blocking task panicked: {join_err}"))
            })??;
            return Ok(READONLY_VERIFICATION_SEED.to_string());
        }

        let seed = Uuid::new_v4().to_string();
        let root = self.root.clone();
        let seed_for_write = seed.clone();
        GenericIoPool::spawn(move || {
            crate::executor::assert_on_io_pool();
            let container = verification_container(root.as_ref(), &seed_for_write)?;
            let probe = random_probe_bytes();
            container
                .write_blob_atomic("master.dat", &mut &probe[..], probe.len() as u64, false)
                .map_err(|err| RepositoryError::Verification {
                    path: format!("verify-{}/master.dat", seed_for_write),
                    reason: err.to_string(),
                })
        })
        .await
        .map_err(|join_err| {
            RepositoryError::repository("repository", anyhow::anyhow!("blocking task panicked: {join_err}"))
        })??;
        Ok(seed)
    }

    /// Asserts `master.dat` exists for this verification round, then writes
    /// `data-<nodeId>.dat` alongside it -- the round-trip a caller uses to
    /// confirm `nodeId` can both read and write the shared store.
    pub async fn verify(&self, seed: &str, node_id: &str) -> Result<()> {
        let root = self.root.clone();
        let seed = seed.to_string();
        let node_id = node_id.to_string();
        GenericIoPool::spawn(move || {
            crate::executor::assert_on_io_pool();
            let container = verification_container(root.as_ref(), &seed)?;
            let master_path = format!("verify-{}/master.dat", seed);
            let exists = container
                .blob_exists("master.dat")
                .map_err(|err| RepositoryError::Verification {
                    path: master_path.clone(),
                    reason: err.to_string(),
                })?;
            if !exists {
                return Err(RepositoryError::Verification {
                    path: master_path,
                    reason: "master probe blob not found".into(),
                });
            }
            let probe = random_probe_bytes();
            let blob_name = format!("data-{}.dat", node_id);
            container
                .write_blob_atomic(&blob_name, &mut &probe[..], probe.len() as u64, false)
                .map_err(|err| RepositoryError::Verification {
                    path: format!("verify-{}/{}", seed, blob_name),
                    reason: err.to_string(),
                })
        })
        .await
        .map_err(|join_err| {
            RepositoryError::repository("repository", anyhow::anyhow!("blocking task panicked: {join_err}"))
        })?
    }

    /// Deletes the whole `verify-<seed>/` test prefix. A no-op for the
    /// read-only sentinel seed, which never wrote anything.
    pub async fn end_verification(&self, seed: &str) -> Result<()> {
        if seed == READONLY_VERIFICATION_SEED {
            return Ok(());
        }
        let root = self.root.clone();
        let seed = seed.to_string();
        GenericIoPool::spawn(move || {
            crate::executor::assert_on_io_pool();
            let container = verification_container(root.as_ref(), &seed)?;
            container.delete_container().map_err(|err| RepositoryError::Verification {
                path: format!("verify-{}", seed),
                reason: err.to_string(),
            })
        })
        .await
        .map_err(|join_err| {
            RepositoryError::repository("repository", anyhow::anyhow!("blocking task panicked: {join_err}"))
        })?
    }

    /// Closes the underlying blob store. Safe to call more than once -- the
    /// decision of whether this call is the one that actually closes it is
    /// made under `closed`'s lock; only the winner reaches `root.close()`.
    pub async fn close(&self) -> Result<()> {
        {
            let mut closed = self.closed.lock().unwrap();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }
        let root = self.root.clone();
        GenericIoPool::spawn(move || {
            crate::executor::assert_on_io_pool();
            root.close().map_err(|err| RepositoryError::repository("repository", err))
        })
        .await
        .map_err(|join_err| {
            RepositoryError::repository("repository", anyhow::anyhow!("blocking task panicked: {join_err}"))
        })?
    }

    pub fn snapshot_creator(
        &self,
        index: &IndexId,
        shard: u32,
        local: Arc<dyn LocalShardStore>,
    ) -> Result<SnapshotCreator> {
        let shard_container = self.shard_container(index, shard)?;
        Ok(SnapshotCreator::new(
            shard_container,
            local,
            self.settings.clone(),
            self.upload_limiter.clone(),
        ))
    }

    pub fn restore_engine(
        &self,
        index: &IndexId,
        shard: u32,
        local: Arc<dyn LocalRestoreTarget>,
    ) -> Result<RestoreEngine> {
        let shard_container = self.shard_container(index, shard)?;
        Ok(RestoreEngine::new(
            shard_container,
            local,
            self.restore_limiter.clone(),
        ))
    }

    pub async fn verify_shard(&self, index: &IndexId, shard: u32) -> Result<ShardVerificationReport> {
        let shard_container = self.shard_container(index, shard)?;
        VerificationProbe::new(shard_container).verify_shard().await
    }

    pub async fn repository_data(&self) -> Result<RepositoryData> {
        let index = self.repository_index();
        run_blocking(move || {
            crate::executor::assert_on_io_pool();
            Ok(index.get_repository_data()?.1)
        })
        .await
    }
}

async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match GenericIoPool::spawn(f).await {
        Ok(result) => result,
        Err(join_err) => Err(RepositoryError::repository(
            "repository",
            anyhow::anyhow!("blocking task panicked: {join_err}"),
        )),
    }
}

fn write_global_metadata(
    root: &dyn BlobContainer,
    snapshot: &SnapshotId,
    indices: &[IndexId],
    compress: bool,
) -> Result<()> {
    let meta = GlobalMetadata {
        snapshot_name: snapshot.name.clone(),
        snapshot_uuid: snapshot.uuid,
        index_names: indices.iter().map(|index| index.name.clone()).collect(),
    };
    let bytes = codec::encode(CodecKind::GlobalMetadata, &meta, compress)?;
    let blob_name = format!("meta-{}.dat", snapshot.uuid);
    root.write_blob_atomic(&blob_name, &mut &bytes[..], bytes.len() as u64, false)
        .map_err(|err| RepositoryError::repository("repository", err))
}

fn write_index_metadata(
    root: &dyn BlobContainer,
    index_id: &IndexId,
    snapshot: &SnapshotId,
    compress: bool,
) -> Result<()> {
    let meta = IndexMetadata {
        index_id: index_id.id,
        index_name: index_id.name.clone(),
        snapshot_uuid: snapshot.uuid,
    };
    let bytes = codec::encode(CodecKind::IndexMetadata, &meta, compress)?;
    let container = root
        .child(&format!("indices/{}", index_id.id))
        .map_err(|err| RepositoryError::repository("repository", err))?;
    let blob_name = format!("meta-{}.dat", snapshot.uuid);
    container
        .write_blob_atomic(&blob_name, &mut &bytes[..], bytes.len() as u64, false)
        .map_err(|err| RepositoryError::repository("repository", err))
}

fn write_snapshot_info(root: &dyn BlobContainer, info: &SnapshotInfo, compress: bool) -> Result<()> {
    let bytes = codec::encode(CodecKind::SnapshotInfo, info, compress)?;
    let blob_name = format!("snap-{}.dat", info.uuid);
    root.write_blob_atomic(&blob_name, &mut &bytes[..], bytes.len() as u64, false)
        .map_err(|err| RepositoryError::repository("repository", err))
}

/// Best-effort read of the root `SnapshotInfo` blob, for provenance only --
/// any failure (missing blob, corruption) simply yields `None` rather than
/// failing the caller's delete.
fn read_snapshot_info_best_effort(root: &dyn BlobContainer, uuid: Uuid) -> Option<SnapshotInfo> {
    let blob_name = format!("snap-{}.dat", uuid);
    let mut reader = root.read_blob(&blob_name).ok()?;
    codec::decode_from(&mut reader, CodecKind::SnapshotInfo).ok()
}

fn verification_container(root: &dyn BlobContainer, seed: &str) -> Result<Arc<dyn BlobContainer>> {
    root.child(&format!("verify-{}", seed))
        .map_err(|err| RepositoryError::repository("repository", err))
}

/// 32 bytes of random content for a verification probe blob -- enough to
/// make an accidental short-read or zero-length write obvious, not a
/// cryptographic commitment.
fn random_probe_bytes() -> [u8; 32] {
    rand::thread_rng().gen()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::fs::FsBlobContainer;

    fn root() -> Arc<dyn BlobContainer> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(FsBlobContainer::new(dir.path().join("repo")).unwrap())
    }

    #[tokio::test]
    async fn initialize_then_finalize_snapshot() {
        let repo = Repository::start(root(), RepositorySettings::default()).unwrap();
        let index_id = IndexId::new("products");
        let snapshot = repo
            .initialize_snapshot("daily", vec![index_id])
            .await
            .unwrap();

        let data = repo.repository_data().await.unwrap();
        assert_eq!(
            data.snapshots.get(&snapshot.uuid).unwrap().state,
            SnapshotState::InProgress
        );

        repo.finalize_snapshot(snapshot.uuid, true).await.unwrap();
        let data = repo.repository_data().await.unwrap();
        assert_eq!(
            data.snapshots.get(&snapshot.uuid).unwrap().state,
            SnapshotState::Success
        );
    }

    #[tokio::test]
    async fn duplicate_snapshot_name_is_rejected() {
        let repo = Repository::start(root(), RepositorySettings::default()).unwrap();
        repo.initialize_snapshot("daily", vec![]).await.unwrap();
        let err = repo.initialize_snapshot("daily", vec![]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidSnapshotName(_)));
    }

    #[tokio::test]
    async fn readonly_repository_rejects_new_snapshots() {
        let mut settings = RepositorySettings::default();
        settings.readonly = true;
        let repo = Repository::start(root(), settings).unwrap();
        let err = repo.initialize_snapshot("daily", vec![]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ReadOnlyRepository));
    }

    #[tokio::test]
    async fn readonly_repository_rejects_finalize_and_delete() {
        let mut settings = RepositorySettings::default();
        settings.readonly = true;
        let repo = Repository::start(root(), settings).unwrap();
        let uuid = uuid::Uuid::new_v4();
        assert!(matches!(
            repo.finalize_snapshot(uuid, true).await.unwrap_err(),
            RepositoryError::ReadOnlyRepository
        ));
        assert!(matches!(
            repo.delete_snapshot(uuid, 1).await.unwrap_err(),
            RepositoryError::ReadOnlyRepository
        ));
    }

    #[tokio::test]
    async fn delete_snapshot_reclaims_an_orphaned_index() {
        let repo = Repository::start(root(), RepositorySettings::default()).unwrap();
        let index_id = IndexId::new("products");
        let snapshot = repo
            .initialize_snapshot("daily", vec![index_id.clone()])
            .await
            .unwrap();

        let shard_container = repo.shard_container(&index_id, 0).unwrap();
        shard_container
            .write_blob("marker", &mut &b""[..], 0, false)
            .unwrap();
        assert!(repo
            .index_container(&index_id)
            .unwrap()
            .blob_exists("0/marker")
            .unwrap());

        repo.delete_snapshot(snapshot.uuid, 1).await.unwrap();

        let data = repo.repository_data().await.unwrap();
        assert!(data.snapshots.is_empty());
        assert!(data.index_names.is_empty());
        assert!(!repo
            .index_container(&index_id)
            .unwrap()
            .blob_exists("0/marker")
            .unwrap());
    }

    #[tokio::test]
    async fn initialize_snapshot_writes_global_and_index_metadata_blobs() {
        let repo = Repository::start(root(), RepositorySettings::default()).unwrap();
        let index_id = IndexId::new("products");
        let snapshot = repo
            .initialize_snapshot("daily", vec![index_id.clone()])
            .await
            .unwrap();

        assert!(repo
            .root
            .blob_exists(&format!("meta-{}.dat", snapshot.uuid))
            .unwrap());
        assert!(repo
            .index_container(&index_id)
            .unwrap()
            .blob_exists(&format!("meta-{}.dat", snapshot.uuid))
            .unwrap());
    }

    #[tokio::test]
    async fn finalize_snapshot_writes_root_snapshot_info() {
        let repo = Repository::start(root(), RepositorySettings::default()).unwrap();
        let index_id = IndexId::new("products");
        let snapshot = repo
            .initialize_snapshot("daily", vec![index_id])
            .await
            .unwrap();
        repo.finalize_snapshot(snapshot.uuid, true).await.unwrap();

        let blob_name = format!("snap-{}.dat", snapshot.uuid);
        assert!(repo.root.blob_exists(&blob_name).unwrap());
        let mut reader = repo.root.read_blob(&blob_name).unwrap();
        let info: SnapshotInfo = codec::decode_from(&mut reader, CodecKind::SnapshotInfo).unwrap();
        assert_eq!(info.uuid, snapshot.uuid);
        assert_eq!(info.state, SnapshotState::Success);
    }

    #[tokio::test]
    async fn delete_snapshot_removes_root_metadata_and_snapshot_info() {
        let repo = Repository::start(root(), RepositorySettings::default()).unwrap();
        let index_id = IndexId::new("products");
        let snapshot = repo
            .initialize_snapshot("daily", vec![index_id])
            .await
            .unwrap();
        repo.finalize_snapshot(snapshot.uuid, true).await.unwrap();
        repo.delete_snapshot(snapshot.uuid, 1).await.unwrap();

        assert!(!repo
            .root
            .blob_exists(&format!("meta-{}.dat", snapshot.uuid))
            .unwrap());
        assert!(!repo
            .root
            .blob_exists(&format!("snap-{}.dat", snapshot.uuid))
            .unwrap());
    }

    #[tokio::test]
    async fn verification_round_trip_writes_and_cleans_up_probe_blobs() {
        let repo = Repository::start(root(), RepositorySettings::default()).unwrap();
        let seed = repo.start_verification().await.unwrap();
        assert_ne!(seed, READONLY_VERIFICATION_SEED);

        let probe_container = repo.root.child(&format!("verify-{}", seed)).unwrap();
        assert!(probe_container.blob_exists("master.dat").unwrap());

        repo.verify(&seed, "node-a").await.unwrap();
        assert!(probe_container.blob_exists("data-node-a.dat").unwrap());

        repo.end_verification(&seed).await.unwrap();
        assert!(!probe_container.blob_exists("master.dat").unwrap());
    }

    #[tokio::test]
    async fn readonly_repository_start_verification_returns_sentinel_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root: Arc<dyn BlobContainer> = Arc::new(FsBlobContainer::new(dir.path().join("repo")).unwrap());
        {
            let repo = Repository::start(root.clone(), RepositorySettings::default()).unwrap();
            repo.initialize_snapshot("daily", vec![]).await.unwrap();
        }

        let mut settings = RepositorySettings::default();
        settings.readonly = true;
        let repo = Repository::start(root, settings).unwrap();
        let seed = repo.start_verification().await.unwrap();
        assert_eq!(seed, READONLY_VERIFICATION_SEED);
        repo.end_verification(&seed).await.unwrap();
    }

    #[tokio::test]
    async fn verify_without_start_verification_fails() {
        let repo = Repository::start(root(), RepositorySettings::default()).unwrap();
        let err = repo.verify("no-such-seed", "node-a").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Verification { .. }));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let repo = Repository::start(root(), RepositorySettings::default()).unwrap();
        repo.close().await.unwrap();
        repo.close().await.unwrap();
    }
}
