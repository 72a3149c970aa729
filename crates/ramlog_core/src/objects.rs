//! Object write path over the log and the key index.
//!
//! Objects are explicitly freed when overwritten or removed. Tombstones are
//! never freed explicitly: they die on their own once the segment that held
//! the deleted object has left the log.

use crate::entry::{LogEntry, LogEntryType, Object, ObjectTombstone};
use crate::error::{LogError, LogResult};
use crate::index::ObjectIndex;
use crate::log::{Log, LogEntryHandler};
use crate::types::{LogEntryHandle, TableId};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

/// Result of a successful read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRead {
    /// Object version.
    pub version: u64,
    /// Write time in seconds since the Unix epoch.
    pub timestamp: u32,
    /// Value bytes.
    pub data: Bytes,
}

/// What the index currently holds for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexedVersion {
    /// Nothing indexed.
    Absent,
    /// An object at this version.
    Object(u64),
    /// A tombstone for this object version.
    Tombstone(u64),
}

impl IndexedVersion {
    /// Looks up `key` and decodes the version of whatever it maps to.
    pub fn lookup(
        log: &Log,
        index: &dyn ObjectIndex,
        table_id: TableId,
        key: &[u8],
    ) -> LogResult<(Self, Option<LogEntryHandle>)> {
        let Some(handle) = index.lookup(table_id, key) else {
            return Ok((Self::Absent, None));
        };
        let entry = log.read_entry(handle)?;
        let version = match handle.entry_type() {
            LogEntryType::Object => Self::Object(Object::decode(&entry.payload)?.version),
            LogEntryType::ObjectTombstone => {
                Self::Tombstone(ObjectTombstone::decode(&entry.payload)?.object_version)
            }
            other => {
                return Err(LogError::corruption(format!(
                    "index maps a key to a {other:?} entry"
                )))
            }
        };
        Ok((version, Some(handle)))
    }
}

/// Current time in seconds since the Unix epoch.
#[must_use]
pub fn timestamp_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Cleaner callbacks for objects.
struct ObjectHandler {
    index: Arc<dyn ObjectIndex>,
}

impl LogEntryHandler for ObjectHandler {
    fn is_live(&self, entry: &LogEntry) -> bool {
        match Object::decode(&entry.payload) {
            Ok(object) => self.index.lookup(object.table_id, object.key) == Some(entry.handle),
            Err(_) => false,
        }
    }

    fn relocate(&self, old: &LogEntry, new: LogEntryHandle) -> bool {
        match Object::decode(&old.payload) {
            Ok(object) => self
                .index
                .replace_if(object.table_id, object.key, old.handle, new),
            Err(_) => false,
        }
    }

    fn timestamp(&self, entry: &LogEntry) -> u32 {
        Object::decode(&entry.payload).map_or(0, |o| o.timestamp)
    }
}

/// Cleaner callbacks for tombstones.
struct TombstoneHandler {
    log: Weak<Log>,
    index: Arc<dyn ObjectIndex>,
}

impl TombstoneHandler {
    fn segment_live(&self, segment_id: u64) -> bool {
        self.log
            .upgrade()
            .is_some_and(|log| log.is_segment_live(segment_id))
    }
}

/// A tombstone stays live while the index points at it, which holds for
/// tombstones replayed from another server's log, or while the segment of the
/// object it deletes is still in this log.
impl LogEntryHandler for TombstoneHandler {
    fn is_live(&self, entry: &LogEntry) -> bool {
        let Ok(tombstone) = ObjectTombstone::decode(&entry.payload) else {
            return false;
        };
        self.index.lookup(tombstone.table_id, tombstone.key) == Some(entry.handle)
            || self.segment_live(tombstone.segment_id)
    }

    fn relocate(&self, old: &LogEntry, new: LogEntryHandle) -> bool {
        let Ok(tombstone) = ObjectTombstone::decode(&old.payload) else {
            return false;
        };
        self.index
            .replace_if(tombstone.table_id, tombstone.key, old.handle, new)
            || self.segment_live(tombstone.segment_id)
    }

    fn timestamp(&self, entry: &LogEntry) -> u32 {
        ObjectTombstone::decode(&entry.payload).map_or(0, |t| t.timestamp)
    }
}

/// Reads and writes objects stored in a log.
pub struct ObjectManager {
    log: Arc<Log>,
    index: Arc<dyn ObjectIndex>,
    /// Serialises writers; holds each table's lowest version for a new key.
    version_floors: Mutex<HashMap<TableId, u64>>,
}

impl std::fmt::Debug for ObjectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectManager")
            .field("log", &self.log)
            .field("keys", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl ObjectManager {
    /// Creates the manager and registers the object and tombstone handlers
    /// with `log`.
    pub fn new(log: Arc<Log>, index: Arc<dyn ObjectIndex>) -> LogResult<Self> {
        log.register_type(
            LogEntryType::Object,
            true,
            Arc::new(ObjectHandler {
                index: Arc::clone(&index),
            }),
        )?;
        log.register_type(
            LogEntryType::ObjectTombstone,
            false,
            Arc::new(TombstoneHandler {
                log: Arc::downgrade(&log),
                index: Arc::clone(&index),
            }),
        )?;
        Ok(Self {
            log,
            index,
            version_floors: Mutex::new(HashMap::new()),
        })
    }

    /// The underlying log.
    #[must_use]
    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    /// The key index.
    #[must_use]
    pub fn index(&self) -> &Arc<dyn ObjectIndex> {
        &self.index
    }

    /// Writes `data` under `key` and returns the new version.
    ///
    /// Overwriting an object appends a tombstone for the old version together
    /// with the new object in one atomic batch.
    pub fn write(&self, table_id: TableId, key: &[u8], data: &[u8]) -> LogResult<u64> {
        let mut floors = self.version_floors.lock();
        let (current, current_handle) =
            IndexedVersion::lookup(&self.log, self.index.as_ref(), table_id, key)?;
        let floor = floors.get(&table_id).copied().unwrap_or(1);
        let version = match current {
            IndexedVersion::Absent => floor,
            IndexedVersion::Object(v) | IndexedVersion::Tombstone(v) => (v + 1).max(floor),
        };

        let now = timestamp_now();
        let object = Object {
            table_id,
            key,
            version,
            timestamp: now,
            data,
        };
        let object_payload = object.encode()?;

        let handle = match (current, current_handle) {
            (IndexedVersion::Object(old_version), Some(old_handle)) => {
                let tombstone = ObjectTombstone {
                    table_id,
                    key,
                    segment_id: old_handle.segment_id(),
                    object_version: old_version,
                    timestamp: now,
                };
                let tombstone_payload = tombstone.encode()?;
                let handles = self.log.multi_append(
                    &[
                        (LogEntryType::ObjectTombstone, tombstone_payload.as_slice()),
                        (LogEntryType::Object, object_payload.as_slice()),
                    ],
                    true,
                )?;
                let handle = handles
                    .get(1)
                    .copied()
                    .ok_or_else(|| LogError::invalid_operation("batch append lost an entry"))?;
                self.index.replace(table_id, key, handle);
                self.log.free(old_handle)?;
                handle
            }
            _ => {
                let handle = self
                    .log
                    .append(LogEntryType::Object, &object_payload, true)?;
                self.index.replace(table_id, key, handle);
                handle
            }
        };

        let floor = floors.entry(table_id).or_insert(1);
        *floor = (*floor).max(version + 1);
        tracing::trace!(%table_id, version, %handle, "object written");
        Ok(version)
    }

    /// Reads the current value of `key`.
    pub fn read(&self, table_id: TableId, key: &[u8]) -> LogResult<Option<ObjectRead>> {
        let _guard = self.log.pin();
        let Some(handle) = self.index.lookup(table_id, key) else {
            return Ok(None);
        };
        if handle.entry_type() != LogEntryType::Object {
            return Ok(None);
        }
        let entry = self.log.read_entry(handle)?;
        let object = Object::decode(&entry.payload)?;
        let (version, timestamp) = (object.version, object.timestamp);
        let data = entry.payload.slice_ref(object.data);
        Ok(Some(ObjectRead {
            version,
            timestamp,
            data,
        }))
    }

    /// Removes `key`. Returns the version removed, if the key existed.
    pub fn remove(&self, table_id: TableId, key: &[u8]) -> LogResult<Option<u64>> {
        let mut floors = self.version_floors.lock();
        let (current, handle) =
            IndexedVersion::lookup(&self.log, self.index.as_ref(), table_id, key)?;
        let (IndexedVersion::Object(version), Some(handle)) = (current, handle) else {
            return Ok(None);
        };

        let tombstone = ObjectTombstone {
            table_id,
            key,
            segment_id: handle.segment_id(),
            object_version: version,
            timestamp: timestamp_now(),
        };
        self.log
            .append(LogEntryType::ObjectTombstone, &tombstone.encode()?, true)?;
        self.index.remove(table_id, key);
        self.log.free(handle)?;

        let floor = floors.entry(table_id).or_insert(1);
        *floor = (*floor).max(version + 1);
        Ok(Some(version))
    }
}
