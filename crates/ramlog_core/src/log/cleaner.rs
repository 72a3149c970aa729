//! Log cleaner.
//!
//! Compacts cleanable segments by copying their live entries into survivor
//! segments. Copying happens outside the log lock; the relocation handler
//! decides at commit time whether each copy is still wanted.

use super::{Log, SegmentSnapshot};
use crate::entry::{EntryIterator, LogEntry};
use crate::error::{LogError, LogResult};
use crate::types::LogEntryHandle;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Outcome of one cleaning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanerPass {
    /// Segments handed back to the log.
    pub segments_cleaned: usize,
    /// Entries examined in those segments (log metadata excluded).
    pub entries_examined: u64,
    /// Entries copied into survivors and kept.
    pub entries_relocated: u64,
    /// Entries found dead or unwanted after copying.
    pub entries_dropped: u64,
    /// Survivor segments used.
    pub survivors: usize,
}

/// Copies live entries out of fragmented segments.
#[derive(Debug, Clone)]
pub struct LogCleaner {
    log: Arc<Log>,
}

impl LogCleaner {
    /// Creates a cleaner for `log`.
    #[must_use]
    pub fn new(log: Arc<Log>) -> Self {
        Self { log }
    }

    /// Runs one cleaning pass.
    pub fn run_pass(&self) -> LogResult<CleanerPass> {
        self.log.get_new_cleanable_segments();
        let candidates = self.select(self.log.cleanable_segments());
        if candidates.is_empty() {
            return Ok(CleanerPass::default());
        }

        let mut pass = CleanerPass::default();
        let mut survivors = Vec::new();
        let mut cleaned = Vec::with_capacity(candidates.len());
        for snapshot in &candidates {
            if let Err(e) = self.relocate_segment(snapshot, &mut survivors, &mut pass) {
                // Survivors may already hold relocated entries the index
                // points at; they must be kept.
                self.log.cleaning_complete(&cleaned, &survivors)?;
                return Err(e);
            }
            cleaned.push(snapshot.segment_id);
        }

        self.log.cleaning_complete(&cleaned, &survivors)?;
        pass.segments_cleaned = cleaned.len();
        pass.survivors = survivors.len();
        debug!(
            segments = pass.segments_cleaned,
            relocated = pass.entries_relocated,
            dropped = pass.entries_dropped,
            survivors = pass.survivors,
            "cleaner pass complete"
        );
        Ok(pass)
    }

    /// Picks the segments with the best cost-benefit score.
    fn select(&self, mut candidates: Vec<SegmentSnapshot>) -> Vec<SegmentSnapshot> {
        let now = now_secs();
        let mut scored: Vec<(f64, SegmentSnapshot)> = candidates
            .drain(..)
            .map(|snapshot| (self.score(&snapshot, now), snapshot))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .take(self.log.config().max_segments_per_clean)
            .map(|(_, snapshot)| snapshot)
            .collect()
    }

    /// `(1 - u) * age / (1 + u)`, with `u` the live fraction of the segment
    /// and `age` the mean age of its registered entries.
    fn score(&self, snapshot: &SegmentSnapshot, now: u32) -> f64 {
        let u = snapshot.live_bytes as f64 / snapshot.capacity.max(1) as f64;
        let mut total_age = 0u64;
        let mut count = 0u64;
        for view in EntryIterator::new(&snapshot.data).flatten() {
            if view.entry_type.is_reserved() {
                continue;
            }
            if let Some(registration) = self.log.type_registration(view.entry_type) {
                let entry = LogEntry {
                    handle: LogEntryHandle::new(snapshot.segment_id, view.offset, view.entry_type),
                    checksum: view.checksum,
                    payload: snapshot.data.slice_ref(view.payload),
                };
                total_age += u64::from(now.saturating_sub(registration.handler.timestamp(&entry)));
                count += 1;
            }
        }
        let age = if count == 0 { 0.0 } else { total_age as f64 / count as f64 };
        (1.0 - u) * (age + 1.0) / (1.0 + u)
    }

    fn relocate_segment(
        &self,
        snapshot: &SegmentSnapshot,
        survivors: &mut Vec<u64>,
        pass: &mut CleanerPass,
    ) -> LogResult<()> {
        let data: &Bytes = &snapshot.data;
        for view in EntryIterator::new(data) {
            let view = view?;
            if view.entry_type.is_reserved() {
                continue;
            }
            pass.entries_examined += 1;
            let Some(registration) = self.log.type_registration(view.entry_type) else {
                pass.entries_dropped += 1;
                continue;
            };
            let entry = LogEntry {
                handle: LogEntryHandle::new(snapshot.segment_id, view.offset, view.entry_type),
                checksum: view.checksum,
                payload: data.slice_ref(view.payload),
            };
            if !registration.handler.is_live(&entry) {
                pass.entries_dropped += 1;
                continue;
            }

            let new_handle = self.copy_to_survivor(&entry, survivors)?;
            if registration.handler.relocate(&entry, new_handle) {
                pass.entries_relocated += 1;
            } else {
                self.log.free(new_handle)?;
                pass.entries_dropped += 1;
            }
        }
        Ok(())
    }

    fn copy_to_survivor(
        &self,
        entry: &LogEntry,
        survivors: &mut Vec<u64>,
    ) -> LogResult<LogEntryHandle> {
        if let Some(&current) = survivors.last() {
            if let Some(handle) =
                self.log
                    .relocate_append(current, entry.entry_type(), &entry.payload)?
            {
                return Ok(handle);
            }
        }
        let fresh = self.log.allocate_survivor()?;
        survivors.push(fresh);
        self.log
            .relocate_append(fresh, entry.entry_type(), &entry.payload)?
            .ok_or_else(|| {
                LogError::corruption(format!(
                    "entry of {} bytes does not fit an empty survivor",
                    entry.total_len()
                ))
            })
    }

    /// Runs passes on a background thread every `interval` until the handle
    /// is stopped or dropped.
    #[must_use]
    pub fn spawn(self, interval: Duration) -> CleanerHandle {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = Arc::clone(&signal);
        let thread = std::thread::spawn(move || {
            info!(log_id = %self.log.log_id(), "cleaner started");
            let (stopped, wake) = &*thread_signal;
            loop {
                {
                    let mut stopped = stopped.lock();
                    if *stopped {
                        break;
                    }
                    wake.wait_for(&mut stopped, interval);
                    if *stopped {
                        break;
                    }
                }
                if let Err(e) = self.run_pass() {
                    warn!(error = %e, "cleaner pass failed");
                }
            }
            info!(log_id = %self.log.log_id(), "cleaner stopped");
        });
        CleanerHandle {
            signal,
            thread: Some(thread),
        }
    }
}

/// Stops a background cleaner when dropped.
#[derive(Debug)]
pub struct CleanerHandle {
    signal: Arc<(Mutex<bool>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl CleanerHandle {
    /// Signals the cleaner thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let (stopped, wake) = &*self.signal;
        *stopped.lock() = true;
        wake.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("cleaner thread panicked");
            }
        }
    }
}

impl Drop for CleanerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CleanerMode, LogConfig};
    use crate::entry::LogEntryType;
    use crate::log::LogEntryHandler;
    use crate::replica::NullReplicaManager;
    use crate::types::ServerId;
    use parking_lot::Mutex as PlMutex;
    use std::collections::HashSet;

    /// Keeps entries whose first payload byte is in the live set.
    #[derive(Default)]
    struct ByteSet {
        live: PlMutex<HashSet<u8>>,
        moved: PlMutex<Vec<(LogEntryHandle, LogEntryHandle)>>,
    }

    impl LogEntryHandler for ByteSet {
        fn is_live(&self, entry: &LogEntry) -> bool {
            self.live.lock().contains(&entry.payload[0])
        }
        fn relocate(&self, old: &LogEntry, new: LogEntryHandle) -> bool {
            self.moved.lock().push((old.handle, new));
            true
        }
        fn timestamp(&self, _entry: &LogEntry) -> u32 {
            0
        }
    }

    fn log() -> Arc<Log> {
        let config = LogConfig::new()
            .log_capacity(8 * 8192)
            .segment_capacity(8192)
            .max_bytes_per_append(4096)
            .cleaner(CleanerMode::Enabled);
        Arc::new(Log::new(ServerId::new(1), config, Arc::new(NullReplicaManager)).unwrap())
    }

    #[test]
    fn relocates_live_entries_and_frees_segment() {
        let log = log();
        let handler = Arc::new(ByteSet::default());
        log.register_type(LogEntryType::Object, true, handler.clone())
            .unwrap();
        handler.live.lock().insert(1);

        let kept = log.append(LogEntryType::Object, &[1u8; 100], false).unwrap();
        let dropped = log.append(LogEntryType::Object, &[2u8; 100], false).unwrap();
        log.free(dropped).unwrap();
        log.allocate_head().unwrap();

        let pass = LogCleaner::new(Arc::clone(&log)).run_pass().unwrap();
        assert_eq!(pass.segments_cleaned, 1);
        assert_eq!(pass.entries_examined, 2);
        assert_eq!(pass.entries_relocated, 1);
        assert_eq!(pass.entries_dropped, 1);
        assert_eq!(pass.survivors, 1);

        let moved = handler.moved.lock().clone();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].0, kept);
        let copy = log.read_entry(moved[0].1).unwrap();
        assert_eq!(copy.payload.as_ref(), &[1u8; 100][..]);
        assert!(!log.is_segment_live(kept.segment_id()));

        // The next rotation names the survivor and releases the cleaned segment.
        log.allocate_head().unwrap();
        assert!(log.read_entry(kept).is_err());
        assert_eq!(log.stats().segments_reclaimed, 1);
    }

    #[test]
    fn nothing_to_clean() {
        let log = log();
        log.allocate_head().unwrap();
        let pass = LogCleaner::new(log).run_pass().unwrap();
        assert_eq!(pass, CleanerPass::default());
    }

    #[test]
    fn all_dead_segment_uses_no_survivor() {
        let log = log();
        let handler = Arc::new(ByteSet::default());
        log.register_type(LogEntryType::Object, true, handler)
            .unwrap();
        log.append(LogEntryType::Object, &[9u8; 50], false).unwrap();
        log.allocate_head().unwrap();
        let free_before = log.list_sizes().free;

        let pass = LogCleaner::new(Arc::clone(&log)).run_pass().unwrap();
        assert_eq!(pass.survivors, 0);
        assert_eq!(pass.entries_dropped, 1);
        assert_eq!(log.list_sizes().free, free_before);
    }

    #[test]
    fn background_cleaner_stops() {
        let log = log();
        let handle = LogCleaner::new(Arc::clone(&log)).spawn(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        handle.stop();
    }
}
