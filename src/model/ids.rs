//! SnapshotId / IndexId and snapshot lifecycle state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// (human name, opaque uuid). Name is unique across all live snapshots in a
/// repository; the uuid is immutable and appears in every blob name that
/// belongs to the snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId {
    pub name: String,
    pub uuid: Uuid,
}

impl SnapshotId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: Uuid::new_v4(),
        }
    }
}

/// (original index name, opaque repository-assigned id). The id is stable
/// across renames; the name is informational only.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexId {
    pub name: String,
    pub id: Uuid,
}

impl IndexId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotState {
    InProgress,
    Success,
    Partial,
    Failed,
}
