//! The local store collaborator the snapshot creator and restore engine
//! drive: something that can list a shard's files, open verifying readers
//! over them for upload, and accept restored bytes back. Concrete local
//! storage (the sharded index itself) is an external collaborator; this
//! crate only defines the seam.

use std::io::{Read, Write};

use anyhow::Result;

pub struct LocalFileMeta {
    pub name: String,
    pub length: u64,
    pub checksum: u32,
}

/// Read-side collaborator used by the snapshot creator.
pub trait LocalShardStore: Send + Sync {
    fn list_files(&self) -> Result<Vec<LocalFileMeta>>;

    /// Opens a reader over `name` that verifies content as it is consumed,
    /// returning a [`crate::error::LocalCorruption`]-tagged error from
    /// `read()` if it detects a mismatch.
    fn open_verifying_input(&self, name: &str) -> Result<Box<dyn Read + Send>>;

    /// Marks the local store corrupted. Called once an upload surfaces a
    /// `LocalCorruption` error, before it propagates further.
    fn mark_corrupted(&self) {}
}

/// Write-side collaborator used by the restore engine.
pub trait LocalRestoreTarget: Send + Sync {
    fn open_restore_writer(&self, name: &str) -> Result<Box<dyn Write + Send>>;
}

/// Observer the restore engine drives with per-file progress.
pub trait RecoveryStateObserver: Send + Sync {
    fn file_restore_started(&self, _name: &str, _length: u64) {}
    fn file_restore_finished(&self, _name: &str) {}
    fn file_restore_failed(&self, _name: &str, _err: &anyhow::Error) {}
}

/// No-op observer for callers that don't need progress reporting.
pub struct NullRecoveryStateObserver;
impl RecoveryStateObserver for NullRecoveryStateObserver {}
