//! The segmented log.
//!
//! Segments move through a fixed set of lists. Membership is exclusive: a
//! segment is in exactly one list (or is the head) at any time.
//!
//! ```text
//! free ──allocate_head──► head ──rotation──► cleanable_new ──► cleanable
//!   ▲                                                            │ cleaned
//!   │                                                            ▼
//!   └── free_pending_reference ◄──next rotation── free_pending_digest_and_reference
//!       (after epoch barrier)
//!
//! free ──allocate_survivor──► cleaning_into ──► cleanable_pending_digest
//!                                                 ──next rotation──► cleanable_new
//! ```
//!
//! All structural changes happen under one mutex. Entry handlers are always
//! called with that mutex released.

mod cleaner;
mod epoch;
mod handler;

pub use cleaner::{CleanerHandle, CleanerPass, LogCleaner};
pub use epoch::{EpochGuard, EpochTracker};
pub use handler::{LogEntryHandler, TypeRegistration};

use crate::config::{CleanerMode, LogConfig};
use crate::entry::{entry_size, LogEntry, LogEntryType};
use crate::error::{LogError, LogResult};
use crate::replica::ReplicaManager;
use crate::segment::{LogDigest, Segment};
use crate::types::{LogEntryHandle, LogPosition, ServerId};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Segments set aside so the cleaner can make progress when the free list is
/// exhausted.
pub const EMERGENCY_CLEAN_SEGMENTS: usize = 1;

/// Free segments held back from head allocation while a cleaner runs.
const HEAD_RESERVE_SEGMENTS: usize = 1;

/// Counters describing log activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Entries appended.
    pub total_appends: u64,
    /// Bytes appended, entry headers included.
    pub total_bytes_appended: u64,
    /// Bytes marked dead through `free`.
    pub total_bytes_freed: u64,
    /// Heads allocated.
    pub head_allocations: u64,
    /// Survivor segments allocated by the cleaner.
    pub survivors_allocated: u64,
    /// Segments handed back by the cleaner.
    pub segments_cleaned: u64,
    /// Segment blocks returned to the free pool.
    pub segments_reclaimed: u64,
}

/// Number of segments in each lifecycle list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListSizes {
    /// Unused blocks available for heads and survivors.
    pub free: usize,
    /// Blocks reserved for the cleaner.
    pub emergency_cleaner: usize,
    /// Closed segments not yet offered to the cleaner.
    pub cleanable_new: usize,
    /// Segments the cleaner may compact.
    pub cleanable: usize,
    /// Survivors waiting to be named in a digest.
    pub cleanable_pending_digest: usize,
    /// Cleaned segments still named by the current digest.
    pub free_pending_digest_and_reference: usize,
    /// Cleaned segments waiting for in-flight operations to finish.
    pub free_pending_reference: usize,
    /// Survivors the cleaner is filling.
    pub cleaning_into: usize,
}

/// Copy of a segment taken for the cleaner.
#[derive(Debug, Clone)]
pub struct SegmentSnapshot {
    /// Segment id.
    pub segment_id: u64,
    /// Segment bytes at the time of the snapshot.
    pub data: Bytes,
    /// Segment capacity.
    pub capacity: usize,
    /// Bytes not explicitly freed.
    pub live_bytes: u64,
}

#[derive(Debug, Default)]
struct LogInner {
    free_list: Vec<Box<[u8]>>,
    emergency_cleaner_list: Vec<Box<[u8]>>,
    /// Every segment that currently owns a block, by id.
    segments: HashMap<u64, Segment>,
    head: Option<u64>,
    cleanable_new: Vec<u64>,
    cleanable: Vec<u64>,
    cleanable_pending_digest: Vec<u64>,
    free_pending_digest_and_reference: Vec<u64>,
    free_pending_reference: Vec<u64>,
    cleaning_into: Vec<u64>,
    next_segment_id: u64,
    stats: LogStats,
}

impl LogInner {
    fn segment(&self, id: u64) -> LogResult<&Segment> {
        self.segments
            .get(&id)
            .ok_or_else(|| LogError::invalid_operation(format!("segment {id} not in log")))
    }

    fn segment_mut(&mut self, id: u64) -> LogResult<&mut Segment> {
        self.segments
            .get_mut(&id)
            .ok_or_else(|| LogError::invalid_operation(format!("segment {id} not in log")))
    }

    fn resolve(&self, handle: LogEntryHandle) -> LogResult<&Segment> {
        let invalid = || LogError::InvalidHandle {
            segment_id: handle.segment_id(),
            offset: handle.offset(),
        };
        let segment = self.segments.get(&handle.segment_id()).ok_or_else(invalid)?;
        let view = segment.entry(handle.offset()).map_err(|_| invalid())?;
        if view.entry_type != handle.entry_type() {
            return Err(invalid());
        }
        Ok(segment)
    }

    fn list_sizes(&self) -> ListSizes {
        ListSizes {
            free: self.free_list.len(),
            emergency_cleaner: self.emergency_cleaner_list.len(),
            cleanable_new: self.cleanable_new.len(),
            cleanable: self.cleanable.len(),
            cleanable_pending_digest: self.cleanable_pending_digest.len(),
            free_pending_digest_and_reference: self.free_pending_digest_and_reference.len(),
            free_pending_reference: self.free_pending_reference.len(),
            cleaning_into: self.cleaning_into.len(),
        }
    }

    /// Ids of segments that are part of the log, ascending.
    fn member_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .head
            .iter()
            .chain(&self.cleanable_new)
            .chain(&self.cleanable)
            .chain(&self.cleanable_pending_digest)
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    fn add_to_free_list(&mut self, block: Box<[u8]>) {
        if !self.free_list.is_empty() && self.emergency_cleaner_list.len() < EMERGENCY_CLEAN_SEGMENTS
        {
            self.emergency_cleaner_list.push(block);
        } else {
            self.free_list.push(block);
        }
    }
}

fn remove_id(list: &mut Vec<u64>, id: u64) -> bool {
    match list.iter().position(|&x| x == id) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}

/// An append-only, segmented in-memory log.
pub struct Log {
    log_id: ServerId,
    config: LogConfig,
    replicas: Arc<dyn ReplicaManager>,
    epochs: Arc<EpochTracker>,
    types: RwLock<HashMap<LogEntryType, TypeRegistration>>,
    inner: Mutex<LogInner>,
}

impl std::fmt::Debug for Log {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Log")
            .field("log_id", &self.log_id)
            .field("config", &self.config)
            .field("lists", &self.list_sizes())
            .finish_non_exhaustive()
    }
}

impl Log {
    /// Creates a log and carves its capacity into segment blocks.
    pub fn new(
        log_id: ServerId,
        config: LogConfig,
        replicas: Arc<dyn ReplicaManager>,
    ) -> LogResult<Self> {
        config.validate()?;
        let count = config.segment_count();
        let reserve = if count > EMERGENCY_CLEAN_SEGMENTS {
            EMERGENCY_CLEAN_SEGMENTS
        } else {
            0
        };
        let capacity = config.segment_capacity as usize;

        let mut inner = LogInner::default();
        for i in 0..count {
            let block = vec![0u8; capacity].into_boxed_slice();
            if i < reserve {
                inner.emergency_cleaner_list.push(block);
            } else {
                inner.free_list.push(block);
            }
        }

        debug!(
            log_id = %log_id,
            segments = count,
            segment_capacity = capacity,
            "log created"
        );

        Ok(Self {
            log_id,
            config,
            replicas,
            epochs: Arc::new(EpochTracker::new()),
            types: RwLock::new(HashMap::new()),
            inner: Mutex::new(inner),
        })
    }

    /// Id of this log (the owning server).
    #[must_use]
    pub fn log_id(&self) -> ServerId {
        self.log_id
    }

    /// The configuration the log was built with.
    #[must_use]
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Epoch tracker gating reuse of cleaned segments.
    #[must_use]
    pub fn epochs(&self) -> &Arc<EpochTracker> {
        &self.epochs
    }

    /// Pins the current epoch for an operation that reads log memory.
    #[must_use]
    pub fn pin(&self) -> EpochGuard {
        self.epochs.pin()
    }

    /// Replica manager the log writes through.
    #[must_use]
    pub fn replica_manager(&self) -> &Arc<dyn ReplicaManager> {
        &self.replicas
    }

    /// Binds a handler to an entry type.
    pub fn register_type(
        &self,
        entry_type: LogEntryType,
        explicitly_freed: bool,
        handler: Arc<dyn LogEntryHandler>,
    ) -> LogResult<()> {
        if entry_type.is_reserved() {
            return Err(LogError::ReservedType(entry_type));
        }
        let mut types = self.types.write();
        if types.contains_key(&entry_type) {
            return Err(LogError::TypeAlreadyRegistered(entry_type));
        }
        types.insert(
            entry_type,
            TypeRegistration {
                entry_type,
                explicitly_freed,
                handler,
            },
        );
        Ok(())
    }

    /// Handler registered for `entry_type`, if any.
    #[must_use]
    pub fn type_registration(&self, entry_type: LogEntryType) -> Option<TypeRegistration> {
        self.types.read().get(&entry_type).cloned()
    }

    /// Opens a new head segment, closing the previous one.
    ///
    /// Returns the id of the new head.
    pub fn allocate_head(&self) -> LogResult<u64> {
        let mut inner = self.inner.lock();
        self.allocate_head_locked(&mut inner)
    }

    /// Opens a new head only if `segment_id` is still the head.
    ///
    /// Lets a caller that saw a full head rotate without racing another
    /// caller that already rotated.
    pub fn allocate_head_if_still_on(&self, segment_id: u64) -> LogResult<bool> {
        let mut inner = self.inner.lock();
        if inner.head != Some(segment_id) {
            return Ok(false);
        }
        self.allocate_head_locked(&mut inner)?;
        Ok(true)
    }

    /// Appends one entry and returns its handle.
    ///
    /// With `sync` set, returns only after the entry is durable on backups.
    pub fn append(
        &self,
        entry_type: LogEntryType,
        payload: &[u8],
        sync: bool,
    ) -> LogResult<LogEntryHandle> {
        let handles = self.multi_append(&[(entry_type, payload)], sync)?;
        handles
            .into_iter()
            .next()
            .ok_or_else(|| LogError::invalid_operation("append produced no handle"))
    }

    /// Appends entries contiguously in one segment, atomically.
    ///
    /// No reader can observe a prefix of the batch. Handles are returned in
    /// input order.
    pub fn multi_append(
        &self,
        entries: &[(LogEntryType, &[u8])],
        sync: bool,
    ) -> LogResult<Vec<LogEntryHandle>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let mut total = 0usize;
        for (entry_type, payload) in entries {
            if entry_type.is_reserved() {
                return Err(LogError::ReservedType(*entry_type));
            }
            total += entry_size(payload.len());
        }
        let limit = self.config.max_bytes_per_append as usize;
        if total > limit {
            return Err(LogError::EntryTooLarge { size: total, limit });
        }

        let handles = {
            let mut inner = self.inner.lock();
            self.append_locked(&mut inner, entries, total)?
        };

        if sync {
            self.replicas.sync()?;
        }
        Ok(handles)
    }

    fn append_locked(
        &self,
        inner: &mut LogInner,
        entries: &[(LogEntryType, &[u8])],
        total: usize,
    ) -> LogResult<Vec<LogEntryHandle>> {
        let needs_head = match inner.head {
            None => true,
            Some(id) => inner.segment(id)?.appendable_bytes() < total,
        };
        if needs_head {
            self.allocate_head_locked(inner)?;
        }
        let head_id = inner
            .head
            .ok_or_else(|| LogError::out_of_memory("no head segment"))?;
        let head = inner.segment_mut(head_id)?;
        let available = head.appendable_bytes();
        if available < total {
            return Err(LogError::EntryTooLarge {
                size: total,
                limit: available,
            });
        }

        let start = head.tail();
        let mut handles = Vec::with_capacity(entries.len());
        for (entry_type, payload) in entries {
            let offset = head.append(*entry_type, payload)?;
            handles.push(LogEntryHandle::new(head_id, offset, *entry_type));
        }
        self.replicas
            .write(head_id, start, &head.bytes()[start as usize..]);

        inner.stats.total_appends += entries.len() as u64;
        inner.stats.total_bytes_appended += total as u64;
        Ok(handles)
    }

    fn allocate_head_locked(&self, inner: &mut LogInner) -> LogResult<u64> {
        let block = self.get_from_free_list_locked(inner, true)?;
        let id = inner.next_segment_id;

        let mut segment = Segment::open(self.log_id, id, block)?;
        let mut ids = inner.member_ids();
        ids.push(id);
        let digest = LogDigest::new(ids);
        if let Err(e) = segment.append(LogEntryType::LogDigest, &digest.encode()) {
            inner.free_list.push(segment.into_block());
            return Err(e);
        }

        // Nothing changes until the old head is closed.
        let closed = match inner.head {
            Some(old_id) => match Self::close_locked(inner, old_id) {
                Ok(footer) => Some((old_id, footer)),
                Err(e) => {
                    inner.free_list.push(segment.into_block());
                    return Err(e);
                }
            },
            None => None,
        };

        inner.next_segment_id += 1;
        self.replicas.open_segment(id, segment.bytes());
        if let Some((old_id, (footer_at, footer))) = closed {
            self.replicas.write(old_id, footer_at, &footer);
            self.replicas.close_segment(old_id);
            inner.cleanable_new.push(old_id);
        }

        // Survivors are now named by a digest; cleaned segments no longer are.
        let survivors = std::mem::take(&mut inner.cleanable_pending_digest);
        inner.cleanable_new.extend(survivors);
        let cleaned = std::mem::take(&mut inner.free_pending_digest_and_reference);
        inner.free_pending_reference.extend(cleaned);

        inner.segments.insert(id, segment);
        inner.head = Some(id);
        inner.stats.head_allocations += 1;

        debug!(
            log_id = %self.log_id,
            segment_id = id,
            digest_len = digest.len(),
            "allocated head segment"
        );

        self.reclaim_locked(inner);
        Ok(id)
    }

    /// Closes `segment_id` and returns the offset and bytes of its footer.
    fn close_locked(inner: &mut LogInner, segment_id: u64) -> LogResult<(u32, Vec<u8>)> {
        let segment = inner.segment_mut(segment_id)?;
        let footer_at = segment.tail();
        segment.close()?;
        Ok((footer_at, segment.bytes()[footer_at as usize..].to_vec()))
    }

    /// Takes a block from the free list.
    ///
    /// While a cleaner runs, the last free block is a reserve: it is handed
    /// out only when `may_use_reserve` is set and some cleaned segment is
    /// about to become reclaimable.
    fn get_from_free_list_locked(
        &self,
        inner: &mut LogInner,
        may_use_reserve: bool,
    ) -> LogResult<Box<[u8]>> {
        if inner.free_list.is_empty() {
            return Err(LogError::out_of_memory("free list is empty"));
        }
        if inner.free_list.len() <= HEAD_RESERVE_SEGMENTS
            && self.config.cleaner == CleanerMode::Enabled
            && !(may_use_reserve && !inner.free_pending_digest_and_reference.is_empty())
        {
            return Err(LogError::out_of_memory(
                "only the reserve segment remains",
            ));
        }
        inner
            .free_list
            .pop()
            .ok_or_else(|| LogError::out_of_memory("free list is empty"))
    }

    /// Marks the entry at `handle` dead.
    ///
    /// Only accounting changes; the bytes are reclaimed when the cleaner
    /// compacts the segment.
    pub fn free(&self, handle: LogEntryHandle) -> LogResult<()> {
        let mut inner = self.inner.lock();
        let length = {
            let segment = inner.resolve(handle)?;
            segment.entry(handle.offset())?.total_len() as u64
        };
        inner.segment_mut(handle.segment_id())?.free_bytes(length);
        inner.stats.total_bytes_freed += length;
        Ok(())
    }

    /// Copies the entry at `handle` out of the log.
    pub fn read_entry(&self, handle: LogEntryHandle) -> LogResult<LogEntry> {
        let inner = self.inner.lock();
        let segment = inner.resolve(handle)?;
        let view = segment.entry(handle.offset())?;
        Ok(LogEntry {
            handle,
            checksum: view.checksum,
            payload: Bytes::copy_from_slice(view.payload),
        })
    }

    /// Blocks until everything appended so far is durable on backups.
    pub fn sync(&self) -> LogResult<()> {
        self.replicas.sync()
    }

    /// Position of the log head.
    ///
    /// Every later append lands at a greater position.
    #[must_use]
    pub fn head_of_log(&self) -> LogPosition {
        let inner = self.inner.lock();
        match inner.head.and_then(|id| inner.segments.get(&id)) {
            Some(head) => LogPosition::new(head.id(), head.tail()),
            None => LogPosition::new(inner.next_segment_id, 0),
        }
    }

    /// Id of the current head segment.
    #[must_use]
    pub fn head_segment_id(&self) -> Option<u64> {
        self.inner.lock().head
    }

    /// Returns true while `segment_id` holds data that is part of the log.
    ///
    /// Cleaned segments stop being live as soon as cleaning completes, even
    /// though their memory is reclaimed later.
    #[must_use]
    pub fn is_segment_live(&self, segment_id: u64) -> bool {
        let inner = self.inner.lock();
        inner.segments.contains_key(&segment_id)
            && !inner.free_pending_digest_and_reference.contains(&segment_id)
            && !inner.free_pending_reference.contains(&segment_id)
    }

    /// Ids of the segments that make up the log, ascending.
    #[must_use]
    pub fn segment_ids(&self) -> Vec<u64> {
        self.inner.lock().member_ids()
    }

    /// Bytes of one segment, if it still owns memory.
    #[must_use]
    pub fn segment_image(&self, segment_id: u64) -> Option<Bytes> {
        let inner = self.inner.lock();
        inner
            .segments
            .get(&segment_id)
            .map(|s| Bytes::copy_from_slice(s.bytes()))
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> LogStats {
        self.inner.lock().stats.clone()
    }

    /// Current size of every lifecycle list.
    #[must_use]
    pub fn list_sizes(&self) -> ListSizes {
        self.inner.lock().list_sizes()
    }

    /// Moves newly closed segments into the cleanable list and returns their
    /// ids.
    pub fn get_new_cleanable_segments(&self) -> Vec<u64> {
        let mut inner = self.inner.lock();
        let fresh = std::mem::take(&mut inner.cleanable_new);
        inner.cleanable.extend(fresh.iter().copied());
        fresh
    }

    /// Snapshots every cleanable segment.
    #[must_use]
    pub fn cleanable_segments(&self) -> Vec<SegmentSnapshot> {
        let inner = self.inner.lock();
        inner
            .cleanable
            .iter()
            .filter_map(|id| inner.segments.get(id))
            .map(|segment| SegmentSnapshot {
                segment_id: segment.id(),
                data: Bytes::copy_from_slice(segment.bytes()),
                capacity: segment.capacity(),
                live_bytes: segment.live_bytes(),
            })
            .collect()
    }

    /// Opens a survivor segment for the cleaner to copy live entries into.
    ///
    /// Survivors come from the free list without touching the head reserve,
    /// then from the emergency cleaner list.
    pub fn allocate_survivor(&self) -> LogResult<u64> {
        let mut inner = self.inner.lock();
        let block = match self.get_from_free_list_locked(&mut inner, false) {
            Ok(block) => block,
            Err(_) => inner
                .emergency_cleaner_list
                .pop()
                .ok_or_else(|| LogError::out_of_memory("no segment for cleaner survivor"))?,
        };
        let id = inner.next_segment_id;
        inner.next_segment_id += 1;
        let segment = Segment::open(self.log_id, id, block)?;
        self.replicas.open_segment(id, segment.bytes());
        inner.segments.insert(id, segment);
        inner.cleaning_into.push(id);
        inner.stats.survivors_allocated += 1;
        trace!(segment_id = id, "allocated survivor segment");
        Ok(id)
    }

    /// Copies an entry into a survivor segment.
    ///
    /// Returns `None` when the survivor is full.
    pub fn relocate_append(
        &self,
        survivor_id: u64,
        entry_type: LogEntryType,
        payload: &[u8],
    ) -> LogResult<Option<LogEntryHandle>> {
        let mut inner = self.inner.lock();
        if !inner.cleaning_into.contains(&survivor_id) {
            return Err(LogError::invalid_operation(format!(
                "segment {survivor_id} is not a survivor being filled"
            )));
        }
        let survivor = inner.segment_mut(survivor_id)?;
        if !survivor.can_fit(payload.len()) {
            return Ok(None);
        }
        let offset = survivor.append(entry_type, payload)?;
        self.replicas.write(
            survivor_id,
            offset,
            &survivor.bytes()[offset as usize..],
        );
        Ok(Some(LogEntryHandle::new(survivor_id, offset, entry_type)))
    }

    /// Hands cleaned segments and finished survivors back to the log.
    ///
    /// Cleaned segments leave the log stamped with the epoch being closed.
    /// Survivors holding entries are closed and wait for the next digest;
    /// empty survivors return their memory immediately.
    pub fn cleaning_complete(&self, cleaned: &[u64], survivors: &[u64]) -> LogResult<()> {
        let mut inner = self.inner.lock();
        for id in cleaned {
            if !inner.cleanable.contains(id) {
                return Err(LogError::invalid_operation(format!(
                    "segment {id} is not cleanable"
                )));
            }
        }
        for id in survivors {
            if !inner.cleaning_into.contains(id) {
                return Err(LogError::invalid_operation(format!(
                    "segment {id} is not a survivor being filled"
                )));
            }
        }

        let epoch = self.epochs.advance();
        for &id in cleaned {
            remove_id(&mut inner.cleanable, id);
            inner.segment_mut(id)?.set_cleaned_epoch(epoch);
            inner.free_pending_digest_and_reference.push(id);
            inner.stats.segments_cleaned += 1;
        }

        for &id in survivors {
            remove_id(&mut inner.cleaning_into, id);
            let empty = inner.segment(id)?.entry_count() <= 1;
            if empty {
                if let Some(segment) = inner.segments.remove(&id) {
                    self.replicas.free_segment(id);
                    inner.add_to_free_list(segment.into_block());
                }
                continue;
            }
            let survivor = inner.segment_mut(id)?;
            let footer_at = survivor.tail();
            survivor.close()?;
            self.replicas
                .write(id, footer_at, &survivor.bytes()[footer_at as usize..]);
            self.replicas.close_segment(id);
            inner.cleanable_pending_digest.push(id);
        }

        debug!(
            cleaned = cleaned.len(),
            survivors = survivors.len(),
            epoch,
            "cleaning complete"
        );

        self.reclaim_locked(&mut inner);
        Ok(())
    }

    /// Returns reclaimable segments to the free pool.
    ///
    /// Returns the number of segments reclaimed.
    pub fn reclaim(&self) -> usize {
        let mut inner = self.inner.lock();
        self.reclaim_locked(&mut inner)
    }

    /// Waits for in-flight operations that may reference cleaned segments,
    /// then reclaims. Returns the number of segments reclaimed.
    pub fn reclaim_blocking(&self, timeout: Duration) -> usize {
        let newest = {
            let inner = self.inner.lock();
            inner
                .free_pending_reference
                .iter()
                .filter_map(|id| inner.segments.get(id))
                .filter_map(Segment::cleaned_epoch)
                .max()
        };
        if let Some(epoch) = newest {
            self.epochs.wait_for_quiescence(epoch, timeout);
        }
        self.reclaim()
    }

    fn reclaim_locked(&self, inner: &mut LogInner) -> usize {
        let pending = std::mem::take(&mut inner.free_pending_reference);
        let mut reclaimed = 0;
        for id in pending {
            let ready = inner
                .segments
                .get(&id)
                .map_or(true, |s| {
                    self.epochs
                        .is_quiescent_through(s.cleaned_epoch().unwrap_or(0))
                });
            if !ready {
                inner.free_pending_reference.push(id);
                continue;
            }
            if let Some(segment) = inner.segments.remove(&id) {
                self.replicas.free_segment(id);
                inner.add_to_free_list(segment.into_block());
                inner.stats.segments_reclaimed += 1;
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            debug!(reclaimed, "reclaimed cleaned segments");
        }
        reclaimed
    }
}
