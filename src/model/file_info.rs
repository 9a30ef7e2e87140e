//! FileInfo: the content-addressing unit shared across commit points of one
//! shard.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Logical blob name, e.g. `__<uuid>`, beginning with `__`.
    pub name: String,
    /// Physical filename as it exists in the local shard store.
    pub physical_name: String,
    pub length: u64,
    pub checksum: u32,
    /// Maximum bytes per part; 0 means "stored as a single part".
    pub part_size: u64,
}

impl FileInfo {
    /// Two `FileInfo`s are the same underlying content iff their (physical
    /// name, length, checksum) agree. Reuse across commit points relies on
    /// this equivalence.
    pub fn is_same_content(&self, other: &FileInfo) -> bool {
        self.physical_name == other.physical_name
            && self.length == other.length
            && self.checksum == other.checksum
    }

    pub fn num_parts(&self) -> usize {
        if self.part_size == 0 || self.length == 0 {
            return 1;
        }
        ((self.length + self.part_size - 1) / self.part_size) as usize
    }

    /// `__<uuid>` for a single-part file, `__<uuid>.part<i>` otherwise.
    pub fn part_name(&self, index: usize) -> String {
        if self.num_parts() == 1 {
            self.name.clone()
        } else {
            format!("{}.part{}", self.name, index)
        }
    }

    pub fn part_length(&self, index: usize) -> u64 {
        let part_size = if self.part_size == 0 {
            self.length.max(1)
        } else {
            self.part_size
        };
        let offset = index as u64 * part_size;
        self.length.saturating_sub(offset).min(part_size)
    }
}
