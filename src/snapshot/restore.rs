//! Restore engine: rebuilds one snapshot's files onto local storage,
//! verifying each file's checksum as it streams and reporting progress
//! through a [`RecoveryStateObserver`].

use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::Context;

use crate::blob_store::BlobContainer;
use crate::catalog::shard_catalog::ShardCatalogStore;
use crate::error::{RepositoryError, Result};
use crate::executor::{GenericIoPool, GroupedListener};
use crate::model::FileInfo;
use crate::rate_limiter::{RateLimitedReader, RateLimiter};
use crate::sliced_stream::{SliceOpener, SlicedStreamReader};

use super::local_store::{LocalRestoreTarget, NullRecoveryStateObserver, RecoveryStateObserver};

pub struct RestoreEngine {
    shard_container: Arc<dyn BlobContainer>,
    local: Arc<dyn LocalRestoreTarget>,
    restore_limiter: Option<Arc<RateLimiter>>,
    observer: Arc<dyn RecoveryStateObserver>,
}

impl RestoreEngine {
    pub fn new(
        shard_container: Arc<dyn BlobContainer>,
        local: Arc<dyn LocalRestoreTarget>,
        restore_limiter: Option<Arc<RateLimiter>>,
    ) -> Self {
        Self {
            shard_container,
            local,
            restore_limiter,
            observer: Arc::new(NullRecoveryStateObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RecoveryStateObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub async fn restore_shard_snapshot(&self, snapshot_name: &str) -> Result<()> {
        let store = ShardCatalogStore::new(self.shard_container.clone());
        let name = snapshot_name.to_string();
        let (_gen, catalog) = GenericIoPool::spawn(move || {
            crate::executor::assert_on_io_pool();
            store.read()
        })
        .await
        .map_err(|join_err| {
            RepositoryError::IndexShardRestoreFailed(anyhow::anyhow!(
                "catalog read task panicked: {join_err}"
            ))
        })??;

        let commit = catalog
            .commit_points
            .into_iter()
            .find(|c| c.snapshot_name == name)
            .ok_or_else(|| RepositoryError::SnapshotMissing(name.clone()))?;

        let grouped = GroupedListener::new(commit.files.len());
        let mut handles = Vec::with_capacity(commit.files.len());

        for info in commit.files {
            let shard_container = self.shard_container.clone();
            let local = self.local.clone();
            let limiter = self.restore_limiter.clone();
            let observer = self.observer.clone();

            handles.push(tokio::task::spawn(async move {
                GenericIoPool::spawn(move || {
                    observer.file_restore_started(&info.physical_name, info.length);
                    let result = restore_one_file(shard_container, local, &info, limiter.as_deref());
                    match &result {
                        Ok(()) => observer.file_restore_finished(&info.physical_name),
                        Err(err) => observer.file_restore_failed(&info.physical_name, err),
                    }
                    result
                })
                .await
            }));
        }

        for handle in handles {
            let result = match handle.await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(anyhow::anyhow!("restore task panicked: {join_err}")),
                Err(join_err) => Err(anyhow::anyhow!("restore task panicked: {join_err}")),
            };
            grouped.complete(result);
        }

        grouped
            .join()
            .await
            .map_err(RepositoryError::IndexShardRestoreFailed)
    }
}

struct BlobSliceOpener {
    container: Arc<dyn BlobContainer>,
    info: FileInfo,
}

impl SliceOpener for BlobSliceOpener {
    fn open_slice(&mut self, index: usize) -> anyhow::Result<Box<dyn Read + Send>> {
        let blob_name = self.info.part_name(index);
        self.container
            .read_blob(&blob_name)
            .with_context(|| format!("opening {}", blob_name))
    }
}

/// Streams every part of `info` into the local target, computing a running
/// CRC32 alongside the copy and comparing it to `info.checksum` only once
/// every byte has landed -- a truncated transfer must never be mistaken for
/// a good restore just because the prefix happened to checksum right.
fn restore_one_file(
    shard_container: Arc<dyn BlobContainer>,
    local: Arc<dyn LocalRestoreTarget>,
    info: &FileInfo,
    limiter: Option<&RateLimiter>,
) -> anyhow::Result<()> {
    crate::executor::assert_on_io_pool();
    let opener = BlobSliceOpener {
        container: shard_container,
        info: info.clone(),
    };
    let sliced = SlicedStreamReader::new(Box::new(opener), info.num_parts());
    let mut limited = RateLimitedReader::new(sliced, limiter);

    let mut writer = local
        .open_restore_writer(&info.physical_name)
        .with_context(|| format!("opening restore target for {}", info.physical_name))?;

    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = limited
            .read(&mut buf)
            .with_context(|| format!("reading {}", info.physical_name))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer
            .write_all(&buf[..n])
            .with_context(|| format!("writing {}", info.physical_name))?;
        total += n as u64;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", info.physical_name))?;

    if total != info.length {
        anyhow::bail!(
            "restored {} bytes for '{}', expected {}",
            total,
            info.physical_name,
            info.length
        );
    }
    let checksum = hasher.finalize();
    if checksum != info.checksum {
        anyhow::bail!(
            "checksum mismatch restoring '{}': expected {:08x}, got {:08x}",
            info.physical_name,
            info.checksum,
            checksum
        );
    }
    Ok(())
}
