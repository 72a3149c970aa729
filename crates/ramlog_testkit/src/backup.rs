//! Scripted in-memory backups.
//!
//! A [`MockBackupCluster`] serves replicas from memory and lets a test decide,
//! per backup and segment, whether a fetch succeeds, fails or stalls. It also
//! records how many fetches were in flight at once.

use bytes::Bytes;
use parking_lot::Mutex;
use ramlog_core::entry::{EntryIterator, Object, ObjectTombstone};
use ramlog_core::{LogEntryType, ReplicaSnapshot, ServerId};
use ramlog_recovery::{BackupClient, BackupDirectory, FetchError, Replica, Tablet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a backup answers fetches of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupBehavior {
    /// Return the stored replica.
    #[default]
    Serve,
    /// Fail as if the connection broke.
    TransportFailure,
    /// Answer not-ready this many times, then serve.
    NotReady(u32),
    /// Answer with a request error.
    RequestError,
    /// Sleep, then serve.
    Delay(Duration),
}

#[derive(Default)]
struct MockBackup {
    segments: HashMap<u64, Bytes>,
    behaviors: HashMap<u64, BackupBehavior>,
    unreachable: bool,
}

#[derive(Default)]
struct ClusterState {
    backups: Mutex<HashMap<ServerId, MockBackup>>,
    attempts: Mutex<HashMap<(ServerId, u64), u32>>,
    segments_in_flight: Mutex<HashMap<u64, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    duplicate_fetches: AtomicUsize,
}

/// A set of scripted backups.
#[derive(Clone, Default)]
pub struct MockBackupCluster {
    state: Arc<ClusterState>,
}

impl std::fmt::Debug for MockBackupCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackupCluster")
            .field("backups", &self.state.backups.lock().len())
            .field("max_in_flight", &self.max_in_flight())
            .finish()
    }
}

impl MockBackupCluster {
    /// Creates a cluster with no backups.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty backup. Ids never added are unknown to the cluster.
    pub fn add_backup(&self, backup: ServerId) {
        self.state.backups.lock().entry(backup).or_default();
    }

    /// Stores a replica on `backup`, adding the backup if needed.
    pub fn store(&self, backup: ServerId, segment_id: u64, data: Bytes) {
        self.state
            .backups
            .lock()
            .entry(backup)
            .or_default()
            .segments
            .insert(segment_id, data);
    }

    /// Scripts how `backup` answers fetches of `segment_id`.
    pub fn set_behavior(&self, backup: ServerId, segment_id: u64, behavior: BackupBehavior) {
        self.state
            .backups
            .lock()
            .entry(backup)
            .or_default()
            .behaviors
            .insert(segment_id, behavior);
    }

    /// Makes every session to `backup` fail.
    pub fn set_unreachable(&self, backup: ServerId) {
        self.state
            .backups
            .lock()
            .entry(backup)
            .or_default()
            .unreachable = true;
    }

    /// Stores the partition's share of every snapshot on each of `backups`
    /// and returns the replica rows describing them.
    pub fn store_replicas(
        &self,
        backups: &[ServerId],
        snapshots: &[ReplicaSnapshot],
        tablets: &[Tablet],
    ) -> Vec<Replica> {
        let mut rows = Vec::with_capacity(backups.len() * snapshots.len());
        for snapshot in snapshots {
            let filtered = filter_for_tablets(&snapshot.data, tablets);
            for &backup in backups {
                self.store(backup, snapshot.segment_id, filtered.clone());
                rows.push(Replica::new(backup, snapshot.segment_id));
            }
        }
        rows
    }

    /// Fetches of `segment_id` that reached `backup`.
    pub fn attempts(&self, backup: ServerId, segment_id: u64) -> u32 {
        self.state
            .attempts
            .lock()
            .get(&(backup, segment_id))
            .copied()
            .unwrap_or(0)
    }

    /// Fetches that reached any backup.
    pub fn total_attempts(&self) -> u32 {
        self.state.attempts.lock().values().sum()
    }

    /// Most fetches ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Fetches that started while another fetch of the same segment was in
    /// flight.
    pub fn duplicate_fetches(&self) -> usize {
        self.state.duplicate_fetches.load(Ordering::SeqCst)
    }
}

impl BackupDirectory for MockBackupCluster {
    fn session(&self, backup: ServerId) -> Result<Arc<dyn BackupClient>, FetchError> {
        match self.state.backups.lock().get(&backup) {
            None => Err(FetchError::UnknownBackup(backup)),
            Some(b) if b.unreachable => Err(FetchError::unreachable(backup, "connection refused")),
            Some(_) => Ok(Arc::new(BackupSession {
                backup,
                state: Arc::clone(&self.state),
            })),
        }
    }
}

struct BackupSession {
    backup: ServerId,
    state: Arc<ClusterState>,
}

/// Counts a fetch as in flight until dropped.
struct InFlight<'a> {
    state: &'a ClusterState,
    segment_id: u64,
}

impl<'a> InFlight<'a> {
    fn enter(state: &'a ClusterState, segment_id: u64) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let mut segments = state.segments_in_flight.lock();
        let count = segments.entry(segment_id).or_insert(0);
        *count += 1;
        if *count > 1 {
            state.duplicate_fetches.fetch_add(1, Ordering::SeqCst);
        }
        Self { state, segment_id }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(count) = self.state.segments_in_flight.lock().get_mut(&self.segment_id) {
            *count -= 1;
        }
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BackupClient for BackupSession {
    fn get_recovery_data(
        &self,
        _crashed: ServerId,
        segment_id: u64,
        _partition_id: u64,
    ) -> Result<Bytes, FetchError> {
        let _in_flight = InFlight::enter(&self.state, segment_id);
        let attempt = {
            let mut attempts = self.state.attempts.lock();
            let n = attempts.entry((self.backup, segment_id)).or_insert(0);
            *n += 1;
            *n
        };
        let (behavior, data) = {
            let backups = self.state.backups.lock();
            let backup = backups.get(&self.backup);
            (
                backup
                    .and_then(|b| b.behaviors.get(&segment_id).copied())
                    .unwrap_or_default(),
                backup.and_then(|b| b.segments.get(&segment_id).cloned()),
            )
        };

        match behavior {
            BackupBehavior::TransportFailure => {
                return Err(FetchError::unreachable(self.backup, "connection reset"));
            }
            BackupBehavior::NotReady(times) if attempt <= times => {
                return Err(FetchError::NotReady);
            }
            BackupBehavior::RequestError => {
                return Err(FetchError::Request(format!(
                    "{} rejected fetch of segment {segment_id}",
                    self.backup
                )));
            }
            BackupBehavior::Delay(delay) => std::thread::sleep(delay),
            BackupBehavior::NotReady(_) | BackupBehavior::Serve => {}
        }
        data.ok_or_else(|| {
            FetchError::Request(format!("{} has no replica of segment {segment_id}", self.backup))
        })
    }
}

/// Keeps the objects and tombstones of a segment image that fall in
/// `tablets`, in segment order. Stops at the first malformed entry.
pub fn filter_for_tablets(image: &[u8], tablets: &[Tablet]) -> Bytes {
    let mut out = Vec::new();
    for entry in EntryIterator::new(image) {
        let Ok(entry) = entry else {
            break;
        };
        let wanted = match entry.entry_type {
            LogEntryType::Object => Object::decode(entry.payload)
                .is_ok_and(|o| tablets.iter().any(|t| t.contains(o.table_id, o.key))),
            LogEntryType::ObjectTombstone => ObjectTombstone::decode(entry.payload)
                .is_ok_and(|t| tablets.iter().any(|tab| tab.contains(t.table_id, t.key))),
            _ => false,
        };
        if wanted {
            let start = entry.offset as usize;
            out.extend_from_slice(&image[start..start + entry.total_len()]);
        }
    }
    Bytes::from(out)
}
