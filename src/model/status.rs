//! IndexShardSnapshotStatus: in-memory lifecycle of one shard snapshot in
//! progress. `ABORTED` is sticky -- once set, no further phase transition is
//! accepted, and the flag is readable by the uploader between every part.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardSnapshotPhase {
    Init,
    Started,
    Finalize,
    Done,
    Failed,
    Aborted,
}

pub struct IndexShardSnapshotStatus {
    phase: Mutex<ShardSnapshotPhase>,
    aborted: AtomicBool,
    incremental_file_count: AtomicU64,
    total_file_count: AtomicU64,
    incremental_size: AtomicU64,
    total_size: AtomicU64,
    start_time: Mutex<Option<SystemTime>>,
    end_time: Mutex<Option<SystemTime>>,
}

impl IndexShardSnapshotStatus {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(ShardSnapshotPhase::Init),
            aborted: AtomicBool::new(false),
            incremental_file_count: AtomicU64::new(0),
            total_file_count: AtomicU64::new(0),
            incremental_size: AtomicU64::new(0),
            total_size: AtomicU64::new(0),
            start_time: Mutex::new(None),
            end_time: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> ShardSnapshotPhase {
        *self.phase.lock().unwrap()
    }

    /// No-op once `abort()` has been called -- sticky ABORTED wins.
    pub fn transition(&self, phase: ShardSnapshotPhase) {
        let mut current = self.phase.lock().unwrap();
        if *current == ShardSnapshotPhase::Aborted {
            return;
        }
        if phase == ShardSnapshotPhase::Started {
            *self.start_time.lock().unwrap() = Some(SystemTime::now());
        }
        if matches!(phase, ShardSnapshotPhase::Done | ShardSnapshotPhase::Failed) {
            *self.end_time.lock().unwrap() = Some(SystemTime::now());
        }
        *current = phase;
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        let mut current = self.phase.lock().unwrap();
        *current = ShardSnapshotPhase::Aborted;
        *self.end_time.lock().unwrap() = Some(SystemTime::now());
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn set_counters(
        &self,
        incremental_file_count: u64,
        total_file_count: u64,
        incremental_size: u64,
        total_size: u64,
    ) {
        self.incremental_file_count
            .store(incremental_file_count, Ordering::Relaxed);
        self.total_file_count.store(total_file_count, Ordering::Relaxed);
        self.incremental_size.store(incremental_size, Ordering::Relaxed);
        self.total_size.store(total_size, Ordering::Relaxed);
    }

    pub fn incremental_file_count(&self) -> u64 {
        self.incremental_file_count.load(Ordering::Relaxed)
    }

    pub fn total_file_count(&self) -> u64 {
        self.total_file_count.load(Ordering::Relaxed)
    }

    pub fn incremental_size(&self) -> u64 {
        self.incremental_size.load(Ordering::Relaxed)
    }

    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Relaxed)
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        *self.start_time.lock().unwrap()
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        *self.end_time.lock().unwrap()
    }
}

impl Default for IndexShardSnapshotStatus {
    fn default() -> Self {
        Self::new()
    }
}
