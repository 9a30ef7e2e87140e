//! Payload shapes for the per-snapshot metadata blobs written at the
//! repository root and under each index: global cluster metadata, per-index
//! metadata, and the root-level snapshot info record. All three are framed
//! through [`crate::codec`] with their own [`crate::codec::CodecKind`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SnapshotState;

/// Written once per snapshot at `meta-<uuid>.dat` under the repository root
/// when the snapshot is registered. Captures the cluster-wide facts a
/// coordinator needs before any shard snapshot has even started.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobalMetadata {
    pub snapshot_name: String,
    pub snapshot_uuid: Uuid,
    pub index_names: Vec<String>,
}

/// Written once per (index, snapshot) at `indices/<indexId>/meta-<uuid>.dat`,
/// alongside the global metadata. Ties the index back to the snapshot it was
/// captured under.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub index_id: Uuid,
    pub index_name: String,
    pub snapshot_uuid: Uuid,
}

/// Written once per snapshot at `snap-<uuid>.dat` under the repository root
/// on `finalizeSnapshot`. Distinct from the shard-level commit point of the
/// same filename pattern (`indices/<indexId>/<shard>/snap-<uuid>.dat`): this
/// one lives at the root and describes the whole snapshot's outcome, not one
/// shard's files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    pub uuid: Uuid,
    pub state: SnapshotState,
    pub index_ids: Vec<Uuid>,
}
