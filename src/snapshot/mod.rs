//! Per-shard snapshot lifecycle: create, delete, restore.

pub mod creator;
pub mod deleter;
pub mod local_store;
pub mod restore;

pub use creator::SnapshotCreator;
pub use deleter::SnapshotDeleter;
pub use local_store::{LocalFileMeta, LocalRestoreTarget, LocalShardStore, RecoveryStateObserver};
pub use restore::RestoreEngine;
