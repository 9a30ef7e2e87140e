//! Generational catalogs: the repository-level index and the per-shard
//! snapshot catalog.

pub mod repository_index;
pub mod shard_catalog;

pub use repository_index::{RepositoryData, RepositoryIndex, SnapshotEntry};
pub use shard_catalog::{CommitPoint, ShardCatalog, ShardCatalogStore};
