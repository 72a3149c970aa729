//! Replication of log segments to backups.
//!
//! The log reports every byte it writes to a [`ReplicaManager`]. Calls made
//! while the log lock is held (`open_segment`, `write`, `close_segment`,
//! `free_segment`) only queue work; `proceed` pushes queued work forward
//! without blocking and `sync` blocks until everything queued is durable.

use crate::error::LogResult;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Asynchronous replication of log segments.
pub trait ReplicaManager: Send + Sync {
    /// A segment was opened with `initial` as its first bytes.
    fn open_segment(&self, segment_id: u64, initial: &[u8]);

    /// `data` was written at `offset` of an open segment.
    fn write(&self, segment_id: u64, offset: u32, data: &[u8]);

    /// The segment was closed; no more writes follow.
    fn close_segment(&self, segment_id: u64);

    /// The segment left the log; replicas may be discarded.
    fn free_segment(&self, segment_id: u64);

    /// Makes progress on queued replication without blocking.
    fn proceed(&self);

    /// Blocks until every queued write is durable.
    fn sync(&self) -> LogResult<()>;
}

/// Replica manager for a log with zero replicas.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReplicaManager;

impl ReplicaManager for NullReplicaManager {
    fn open_segment(&self, _segment_id: u64, _initial: &[u8]) {}
    fn write(&self, _segment_id: u64, _offset: u32, _data: &[u8]) {}
    fn close_segment(&self, _segment_id: u64) {}
    fn free_segment(&self, _segment_id: u64) {}
    fn proceed(&self) {}
    fn sync(&self) -> LogResult<()> {
        Ok(())
    }
}

/// Durable copy of one segment held by a [`MemoryReplicaManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSnapshot {
    /// Segment id.
    pub segment_id: u64,
    /// Durable bytes of the segment.
    pub data: Bytes,
    /// True once the footer is durable.
    pub closed: bool,
}

#[derive(Debug, Default)]
struct ReplicaImage {
    staged: Vec<u8>,
    durable_len: usize,
    closing: bool,
    closed: bool,
}

#[derive(Debug, Default)]
struct ReplicaState {
    images: HashMap<u64, ReplicaImage>,
    proceed_calls: u64,
    sync_calls: u64,
}

impl ReplicaState {
    fn flush(&mut self) {
        for image in self.images.values_mut() {
            image.durable_len = image.staged.len();
            if image.closing {
                image.closed = true;
            }
        }
    }
}

/// Replica manager that keeps one in-memory copy of every segment.
///
/// Writes become durable on the next `proceed` or `sync`. Used by tests and
/// benchmarks to stand in for a backup cluster.
#[derive(Debug, Default)]
pub struct MemoryReplicaManager {
    state: Mutex<ReplicaState>,
}

impl MemoryReplicaManager {
    /// Creates an empty replica manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `proceed` calls so far.
    #[must_use]
    pub fn proceed_count(&self) -> u64 {
        self.state.lock().proceed_calls
    }

    /// Number of `sync` calls so far.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.state.lock().sync_calls
    }

    /// Durable copy of one segment.
    #[must_use]
    pub fn snapshot(&self, segment_id: u64) -> Option<ReplicaSnapshot> {
        let state = self.state.lock();
        state.images.get(&segment_id).map(|image| ReplicaSnapshot {
            segment_id,
            data: Bytes::copy_from_slice(&image.staged[..image.durable_len]),
            closed: image.closed,
        })
    }

    /// Durable copies of every segment, ordered by segment id.
    #[must_use]
    pub fn snapshots(&self) -> Vec<ReplicaSnapshot> {
        let state = self.state.lock();
        let mut ids: Vec<u64> = state.images.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| {
                state.images.get(&id).map(|image| ReplicaSnapshot {
                    segment_id: id,
                    data: Bytes::copy_from_slice(&image.staged[..image.durable_len]),
                    closed: image.closed,
                })
            })
            .collect()
    }
}

impl ReplicaManager for MemoryReplicaManager {
    fn open_segment(&self, segment_id: u64, initial: &[u8]) {
        let mut state = self.state.lock();
        state.images.insert(
            segment_id,
            ReplicaImage {
                staged: initial.to_vec(),
                ..ReplicaImage::default()
            },
        );
    }

    fn write(&self, segment_id: u64, offset: u32, data: &[u8]) {
        let mut state = self.state.lock();
        if let Some(image) = state.images.get_mut(&segment_id) {
            let offset = offset as usize;
            if image.staged.len() < offset + data.len() {
                image.staged.resize(offset + data.len(), 0);
            }
            image.staged[offset..offset + data.len()].copy_from_slice(data);
        }
    }

    fn close_segment(&self, segment_id: u64) {
        if let Some(image) = self.state.lock().images.get_mut(&segment_id) {
            image.closing = true;
        }
    }

    fn free_segment(&self, segment_id: u64) {
        self.state.lock().images.remove(&segment_id);
    }

    fn proceed(&self) {
        let mut state = self.state.lock();
        state.proceed_calls += 1;
        state.flush();
    }

    fn sync(&self) -> LogResult<()> {
        let mut state = self.state.lock();
        state.sync_calls += 1;
        state.flush();
        Ok(())
    }
}
