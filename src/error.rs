//! Error kinds surfaced by the repository engine.
//!
//! Internal helpers use `anyhow::Error` freely; this enum is the boundary
//! callers actually match on, one variant per terminal condition.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Wraps a lower-level I/O or blob-store failure with repository name context.
    #[error("repository '{name}': {source}")]
    Repository {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("repository verification failed at '{path}': {reason}")]
    Verification { path: String, reason: String },

    #[error("concurrent modification: expected generation {expected:?}, found {found:?}")]
    ConcurrentModification {
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("snapshot '{0}' not found")]
    SnapshotMissing(String),

    #[error("snapshot name '{0}' already exists")]
    InvalidSnapshotName(String),

    #[error("snapshot creation failed: {0}")]
    SnapshotCreationFailed(anyhow::Error),

    #[error("shard snapshot failed: {0}")]
    IndexShardSnapshotFailed(anyhow::Error),

    #[error("shard restore failed: {0}")]
    IndexShardRestoreFailed(anyhow::Error),

    #[error("shard snapshot delete failed: {0}")]
    IndexShardDeleteFailed(anyhow::Error),

    #[error("snapshot aborted")]
    SnapshotAborted,

    #[error("corrupted repository blob '{blob}': {reason}")]
    CorruptedRepository { blob: String, reason: String },

    #[error("repository is read-only")]
    ReadOnlyRepository,
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

impl RepositoryError {
    pub fn repository(name: impl Into<String>, source: anyhow::Error) -> Self {
        RepositoryError::Repository {
            name: name.into(),
            source,
        }
    }
}

/// Marker carried inside an `anyhow::Error` chain so upload/restore code can
/// signal cooperative cancellation without inventing a second error enum.
#[derive(Debug)]
pub struct AbortedMarker;

impl std::fmt::Display for AbortedMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "snapshot aborted")
    }
}
impl std::error::Error for AbortedMarker {}

/// Marker for a local-store read that detected corruption mid-stream.
#[derive(Debug)]
pub struct LocalCorruption(pub String);

impl std::fmt::Display for LocalCorruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "local file corrupted: {}", self.0)
    }
}
impl std::error::Error for LocalCorruption {}
