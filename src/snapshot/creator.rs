//! Snapshot creator: drives one (shard, snapshot) creation -- diff against
//! the existing catalog, allocate data blobs, stream parts, write the
//! commit point, update the catalog.
//!
//! `BlobContainer` is a blocking trait, so every step that touches it runs
//! on [`GenericIoPool`] to get blocking I/O off the async reactor.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use uuid::Uuid;

use crate::blob_store::BlobContainer;
use crate::catalog::shard_catalog::{CommitPoint, ShardCatalogStore};
use crate::codec::{self, CodecKind};
use crate::config::RepositorySettings;
use crate::error::{LocalCorruption, RepositoryError, Result};
use crate::executor::{GenericIoPool, GroupedListener};
use crate::model::{FileInfo, IndexShardSnapshotStatus, ShardSnapshotPhase, SnapshotId};
use crate::rate_limiter::{RateLimitedReader, RateLimiter};

use super::local_store::LocalShardStore;

pub struct SnapshotCreator {
    shard_container: Arc<dyn BlobContainer>,
    local: Arc<dyn LocalShardStore>,
    settings: Arc<RepositorySettings>,
    upload_limiter: Option<Arc<RateLimiter>>,
}

impl SnapshotCreator {
    pub fn new(
        shard_container: Arc<dyn BlobContainer>,
        local: Arc<dyn LocalShardStore>,
        settings: Arc<RepositorySettings>,
        upload_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            shard_container,
            local,
            settings,
            upload_limiter,
        }
    }

    pub async fn create_shard_snapshot(
        &self,
        snapshot: SnapshotId,
        status: Arc<IndexShardSnapshotStatus>,
    ) -> Result<()> {
        if self.settings.readonly {
            return Err(RepositoryError::ReadOnlyRepository);
        }

        let (gen, catalog) = {
            let store = ShardCatalogStore::new(self.shard_container.clone());
            blocking(move || {
                crate::executor::assert_on_io_pool();
                store.read().map_err(anyhow::Error::from)
            })
            .await
            .map_err(RepositoryError::IndexShardSnapshotFailed)?
        };

        if catalog.has_snapshot(&snapshot.name) {
            return Err(RepositoryError::InvalidSnapshotName(snapshot.name));
        }

        let local_files = {
            let local = self.local.clone();
            blocking(move || {
                crate::executor::assert_on_io_pool();
                local.list_files()
            })
            .await
            .map_err(RepositoryError::IndexShardSnapshotFailed)?
        };

        let chunk_size = self.settings.chunk_size;
        let mut files = Vec::with_capacity(local_files.len());
        let mut to_upload = Vec::new();
        let (mut incremental_file_count, mut total_file_count) = (0u64, 0u64);
        let (mut incremental_size, mut total_size) = (0u64, 0u64);

        for meta in &local_files {
            total_file_count += 1;
            total_size += meta.length;
            let reused = catalog
                .find_physical(&meta.name)
                .into_iter()
                .find(|existing| existing.length == meta.length && existing.checksum == meta.checksum)
                .cloned();
            match reused {
                Some(existing) => files.push(existing),
                None => {
                    let info = FileInfo {
                        name: format!("__{}", Uuid::new_v4()),
                        physical_name: meta.name.clone(),
                        length: meta.length,
                        checksum: meta.checksum,
                        part_size: chunk_size,
                    };
                    incremental_file_count += 1;
                    incremental_size += meta.length;
                    to_upload.push(info.clone());
                    files.push(info);
                }
            }
        }

        status.transition(ShardSnapshotPhase::Started);
        status.set_counters(
            incremental_file_count,
            total_file_count,
            incremental_size,
            total_size,
        );

        let already_failed = Arc::new(AtomicBool::new(false));
        let grouped = GroupedListener::new(to_upload.len());
        let mut handles = Vec::with_capacity(to_upload.len());

        for info in to_upload {
            let local = self.local.clone();
            let shard_container = self.shard_container.clone();
            let upload_status = status.clone();
            let already_failed = already_failed.clone();
            let limiter = self.upload_limiter.clone();

            handles.push(tokio::task::spawn(async move {
                GenericIoPool::spawn(move || {
                    upload_one_file(
                        local.as_ref(),
                        shard_container.as_ref(),
                        &info,
                        upload_status.as_ref(),
                        already_failed.as_ref(),
                        limiter.as_deref(),
                    )
                })
                .await
            }));
        }

        // Every spawned upload is joined regardless of earlier failures --
        // in-flight transfers are always allowed to drain.
        for handle in handles {
            let result = match handle.await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(anyhow::anyhow!("upload task panicked: {join_err}")),
                Err(join_err) => Err(anyhow::anyhow!("upload task panicked: {join_err}")),
            };
            if result.is_err() {
                already_failed.store(true, Ordering::SeqCst);
            }
            grouped.complete(result);
        }

        if let Err(err) = grouped.join().await {
            status.transition(ShardSnapshotPhase::Failed);
            return Err(if status.is_aborted() {
                RepositoryError::SnapshotAborted
            } else {
                RepositoryError::IndexShardSnapshotFailed(err)
            });
        }

        status.transition(ShardSnapshotPhase::Finalize);

        let commit = CommitPoint {
            snapshot_name: snapshot.name.clone(),
            snapshot_uuid: snapshot.uuid,
            files,
        };
        let commit_bytes =
            codec::encode(CodecKind::ShardCommitPoint, &commit, self.settings.compress)?;
        let commit_name = format!("snap-{}.dat", snapshot.uuid);
        {
            let shard_container = self.shard_container.clone();
            let commit_name = commit_name.clone();
            blocking(move || {
                crate::executor::assert_on_io_pool();
                shard_container.write_blob_atomic(
                    &commit_name,
                    &mut &commit_bytes[..],
                    commit_bytes.len() as u64,
                    false,
                )
            })
            .await
            .map_err(RepositoryError::IndexShardSnapshotFailed)?;
        }

        let mut new_catalog = catalog;
        new_catalog.commit_points.push(commit);

        {
            let store = ShardCatalogStore::new(self.shard_container.clone());
            blocking(move || {
                crate::executor::assert_on_io_pool();
                store.write(&new_catalog, gen).map_err(anyhow::Error::from)
            })
            .await
            .map_err(|err| match err.downcast::<RepositoryError>() {
                    Ok(repo_err) => repo_err,
                    Err(err) => RepositoryError::IndexShardSnapshotFailed(err),
                })?;
        }

        status.transition(ShardSnapshotPhase::Done);
        Ok(())
    }
}

/// A small shim so fallible blocking work on [`GenericIoPool`] can return
/// `anyhow::Result` without an extra `JoinError` match at every call site.
async fn blocking<F, T>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    GenericIoPool::spawn(f)
        .await
        .unwrap_or_else(|join_err| Err(anyhow::anyhow!("blocking task panicked: {join_err}")))
}

struct AbortCheckingReader<'a, R> {
    inner: R,
    status: &'a IndexShardSnapshotStatus,
}

impl<'a, R: Read> Read for AbortCheckingReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.status.is_aborted() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "snapshot aborted",
            ));
        }
        self.inner.read(buf)
    }
}

fn upload_one_file(
    local: &dyn LocalShardStore,
    shard_container: &dyn BlobContainer,
    info: &FileInfo,
    status: &IndexShardSnapshotStatus,
    already_failed: &AtomicBool,
    limiter: Option<&RateLimiter>,
) -> anyhow::Result<()> {
    crate::executor::assert_on_io_pool();
    if already_failed.load(Ordering::SeqCst) {
        anyhow::bail!("upload skipped: a sibling file already failed");
    }

    let mut reader = local
        .open_verifying_input(&info.physical_name)
        .with_context(|| format!("opening {}", info.physical_name))
        .map_err(|err| {
            mark_if_corrupted(local, &err);
            err
        })?;

    let num_parts = info.num_parts();
    for part in 0..num_parts {
        if status.is_aborted() {
            return Err(crate::error::AbortedMarker.into());
        }
        let part_len = info.part_length(part);
        let source = AbortCheckingReader {
            inner: (&mut reader).take(part_len),
            status,
        };
        let mut limited = RateLimitedReader::new(source, limiter);
        let blob_name = info.part_name(part);

        if let Err(err) = shard_container.write_blob(&blob_name, &mut limited, part_len, false) {
            if status.is_aborted() {
                return Err(crate::error::AbortedMarker.into());
            }
            mark_if_corrupted(local, &err);
            return Err(err).with_context(|| format!("writing {}", blob_name));
        }
    }
    Ok(())
}

fn mark_if_corrupted(local: &dyn LocalShardStore, err: &anyhow::Error) {
    if err.chain().any(|cause| cause.downcast_ref::<LocalCorruption>().is_some()) {
        local.mark_corrupted();
    }
}
