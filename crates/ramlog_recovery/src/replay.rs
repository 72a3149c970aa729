//! Replays recovery data into the local log.
//!
//! Replicas overlap, repeat entries and arrive in any order, so replay is a
//! merge: an entry is applied only if it is at least as new as whatever the
//! index holds for its key. Replaying any collection of entries for a key,
//! in any order and with duplicates, leaves the index on the newest one.
//!
//! The minimum version an incoming entry needs:
//!
//! | indexed         | incoming object | incoming tombstone |
//! |-----------------|-----------------|--------------------|
//! | nothing         | 0               | 0                  |
//! | object `v`      | `v + 1`         | `v`                |
//! | tombstone `ov`  | `ov + 1`        | `ov + 1`           |
//!
//! A tombstone for `v` therefore supersedes object `v`, while object `v`
//! never supersedes a tombstone for `v`.

use crate::error::{RecoveryError, RecoveryResult};
use ramlog_core::entry::{EntryIterator, EntryView, Object, ObjectTombstone};
use ramlog_core::{
    IndexedVersion, Log, LogEntryHandle, LogEntryType, LogError, ObjectIndex, TableId,
};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Counters from one or more replays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Objects appended to the local log.
    pub objects_appended: u64,
    /// Objects older than what was already indexed.
    pub objects_discarded: u64,
    /// Tombstones appended to the local log.
    pub tombstones_appended: u64,
    /// Tombstones older than what was already indexed.
    pub tombstones_discarded: u64,
    /// Entries whose checksum did not match.
    pub corrupt_entries: u64,
    /// Headers, digests and footers passed over.
    pub entries_skipped: u64,
    /// Bytes of recovery data consumed.
    pub bytes_replayed: u64,
}

impl ReplayStats {
    /// Adds `other` into `self`.
    pub fn merge(&mut self, other: &ReplayStats) {
        self.objects_appended += other.objects_appended;
        self.objects_discarded += other.objects_discarded;
        self.tombstones_appended += other.tombstones_appended;
        self.tombstones_discarded += other.tombstones_discarded;
        self.corrupt_entries += other.corrupt_entries;
        self.entries_skipped += other.entries_skipped;
        self.bytes_replayed += other.bytes_replayed;
    }

    /// Entries that changed the index.
    #[must_use]
    pub fn applied(&self) -> u64 {
        self.objects_appended + self.tombstones_appended
    }
}

/// Merges recovery data into a log and its index.
pub struct SegmentReplayer {
    log: Arc<Log>,
    index: Arc<dyn ObjectIndex>,
    progress_interval: usize,
}

impl std::fmt::Debug for SegmentReplayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReplayer")
            .field("log_id", &self.log.log_id())
            .field("progress_interval", &self.progress_interval)
            .finish_non_exhaustive()
    }
}

impl SegmentReplayer {
    /// Creates a replayer. `progress_interval` is the number of bytes
    /// consumed between calls to the replica manager's `proceed`.
    pub fn new(log: Arc<Log>, index: Arc<dyn ObjectIndex>, progress_interval: usize) -> Self {
        Self {
            log,
            index,
            progress_interval: progress_interval.max(1),
        }
    }

    /// Replays every entry of `buffer`, in order.
    ///
    /// `segment_id` names the source segment for logging; it is `None` for
    /// data that does not come from crash recovery. A structural error ends
    /// the replay; entries applied before it stay applied.
    pub fn recover_segment(
        &self,
        segment_id: Option<u64>,
        buffer: &[u8],
    ) -> RecoveryResult<ReplayStats> {
        let mut stats = ReplayStats::default();
        let mut since_progress = 0usize;
        let mut entries = EntryIterator::new(buffer);

        while let Some(entry) = entries.next() {
            let entry = entry.map_err(|e| corrupt(segment_id, &e))?;
            match entry.entry_type {
                LogEntryType::Object => self.replay_object(segment_id, &entry, &mut stats)?,
                LogEntryType::ObjectTombstone => {
                    self.replay_tombstone(segment_id, &entry, &mut stats)?;
                }
                _ => stats.entries_skipped += 1,
            }

            since_progress += entry.total_len();
            if since_progress >= self.progress_interval {
                self.log.replica_manager().proceed();
                since_progress = 0;
            }
        }

        stats.bytes_replayed = entries.offset() as u64;
        debug!(
            segment_id = ?segment_id,
            bytes = stats.bytes_replayed,
            applied = stats.applied(),
            corrupt = stats.corrupt_entries,
            "replayed segment"
        );
        Ok(stats)
    }

    fn replay_object(
        &self,
        segment_id: Option<u64>,
        entry: &EntryView<'_>,
        stats: &mut ReplayStats,
    ) -> RecoveryResult<()> {
        if entry.verify().is_err() {
            warn!(
                segment_id = ?segment_id,
                offset = entry.offset,
                "object checksum mismatch, discarding"
            );
            stats.corrupt_entries += 1;
            return Ok(());
        }
        let object = Object::decode(entry.payload).map_err(|e| corrupt(segment_id, &e))?;
        let (current, _) = self.indexed(object.table_id, object.key)?;
        let min_successor = match current {
            IndexedVersion::Object(v) | IndexedVersion::Tombstone(v) => v + 1,
            IndexedVersion::Absent => 0,
        };
        if object.version < min_successor {
            trace!(version = object.version, min_successor, "object superseded");
            stats.objects_discarded += 1;
            return Ok(());
        }

        self.install(object.table_id, object.key, LogEntryType::Object, entry.payload)?;
        stats.objects_appended += 1;
        Ok(())
    }

    fn replay_tombstone(
        &self,
        segment_id: Option<u64>,
        entry: &EntryView<'_>,
        stats: &mut ReplayStats,
    ) -> RecoveryResult<()> {
        if entry.verify().is_err() {
            warn!(
                segment_id = ?segment_id,
                offset = entry.offset,
                "tombstone checksum mismatch"
            );
            stats.corrupt_entries += 1;
        }
        let tombstone =
            ObjectTombstone::decode(entry.payload).map_err(|e| corrupt(segment_id, &e))?;
        let (current, _) = self.indexed(tombstone.table_id, tombstone.key)?;
        let min_successor = match current {
            IndexedVersion::Object(v) => v,
            IndexedVersion::Tombstone(v) => v + 1,
            IndexedVersion::Absent => 0,
        };
        if tombstone.object_version < min_successor {
            trace!(
                object_version = tombstone.object_version,
                min_successor,
                "tombstone superseded"
            );
            stats.tombstones_discarded += 1;
            return Ok(());
        }

        self.install(
            tombstone.table_id,
            tombstone.key,
            LogEntryType::ObjectTombstone,
            entry.payload,
        )?;
        stats.tombstones_appended += 1;
        Ok(())
    }

    fn indexed(
        &self,
        table_id: TableId,
        key: &[u8],
    ) -> RecoveryResult<(IndexedVersion, Option<LogEntryHandle>)> {
        Ok(IndexedVersion::lookup(
            &self.log,
            self.index.as_ref(),
            table_id,
            key,
        )?)
    }

    /// Appends the entry, points the key at it and frees the object it
    /// replaced. Replaced tombstones are not freed.
    fn install(
        &self,
        table_id: TableId,
        key: &[u8],
        entry_type: LogEntryType,
        payload: &[u8],
    ) -> RecoveryResult<()> {
        let handle = self.log.append(entry_type, payload, false)?;
        if let Some(prior) = self.index.replace(table_id, key, handle) {
            if prior.entry_type() == LogEntryType::Object {
                self.log.free(prior)?;
            }
        }
        Ok(())
    }
}

fn corrupt(segment_id: Option<u64>, err: &LogError) -> RecoveryError {
    RecoveryError::corrupt_segment(segment_id, err.to_string())
}
