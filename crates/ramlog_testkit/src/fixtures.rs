//! Test fixtures: storage nodes, recovery buffers and ownership stubs.

use bytes::Bytes;
use parking_lot::Mutex;
use ramlog_core::entry::{encode_entry, entry_size, Object, ObjectTombstone};
use ramlog_core::{
    Log, LogConfig, LogEntryType, MemoryIndex, MemoryReplicaManager, ObjectIndex, ObjectManager,
    ObjectRead, ServerId, TableId,
};
use ramlog_recovery::{
    BackupDirectory, OwnershipAuthority, RecoveryConfig, RecoveryError, RecoveryMaster,
    RecoveryResult, Tablet,
};
use std::sync::Arc;

/// Segment size used by test nodes.
pub const TEST_SEGMENT_CAPACITY: u32 = 16 * 1024;

/// Segments per test node.
pub const TEST_SEGMENT_COUNT: u64 = 64;

/// Log configuration small enough for unit tests.
pub fn test_log_config() -> LogConfig {
    LogConfig::new()
        .log_capacity(TEST_SEGMENT_COUNT * u64::from(TEST_SEGMENT_CAPACITY))
        .segment_capacity(TEST_SEGMENT_CAPACITY)
        .max_bytes_per_append(TEST_SEGMENT_CAPACITY / 2)
}

/// A storage node: log, index and object manager, replicated into memory.
pub struct TestNode {
    /// Node id, also the log id.
    pub server_id: ServerId,
    /// The node's log.
    pub log: Arc<Log>,
    /// The node's key index.
    pub index: Arc<MemoryIndex>,
    /// Durable copies of the node's segments.
    pub replicas: Arc<MemoryReplicaManager>,
    /// Object write path.
    pub objects: ObjectManager,
}

impl TestNode {
    /// Creates a node with the test configuration.
    pub fn new(id: u64) -> Self {
        Self::with_config(id, test_log_config())
    }

    /// Creates a node with a custom log configuration.
    pub fn with_config(id: u64, config: LogConfig) -> Self {
        let server_id = ServerId::new(id);
        let replicas = Arc::new(MemoryReplicaManager::new());
        let log = Arc::new(
            Log::new(server_id, config, Arc::clone(&replicas) as _)
                .expect("Failed to create test log"),
        );
        let index = Arc::new(MemoryIndex::new());
        let objects = ObjectManager::new(Arc::clone(&log), Arc::clone(&index) as _)
            .expect("Failed to create object manager");
        Self {
            server_id,
            log,
            index,
            replicas,
            objects,
        }
    }

    /// Writes an object and returns its version.
    pub fn write(&self, table_id: TableId, key: &[u8], data: &[u8]) -> u64 {
        self.objects
            .write(table_id, key, data)
            .expect("Failed to write object")
    }

    /// Removes an object.
    pub fn remove(&self, table_id: TableId, key: &[u8]) -> Option<u64> {
        self.objects
            .remove(table_id, key)
            .expect("Failed to remove object")
    }

    /// Reads an object.
    pub fn read(&self, table_id: TableId, key: &[u8]) -> Option<ObjectRead> {
        self.objects
            .read(table_id, key)
            .expect("Failed to read object")
    }

    /// Creates a recovery master replaying into this node.
    pub fn recovery_master(
        &self,
        config: RecoveryConfig,
        directory: Arc<dyn BackupDirectory>,
        authority: Arc<dyn OwnershipAuthority>,
    ) -> RecoveryMaster {
        RecoveryMaster::new(
            self.server_id,
            config,
            Arc::clone(&self.log),
            Arc::clone(&self.index) as Arc<dyn ObjectIndex>,
            directory,
            authority,
        )
        .expect("Failed to create recovery master")
    }
}

/// Builds buffers of encoded entries, as backups send them.
#[derive(Debug, Clone, Default)]
pub struct EntryBuilder {
    buf: Vec<u8>,
    last_entry: Option<usize>,
}

impl EntryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an object entry.
    pub fn object(self, table_id: TableId, key: &[u8], version: u64, data: &[u8]) -> Self {
        let payload = Object {
            table_id,
            key,
            version,
            timestamp: 0,
            data,
        }
        .encode()
        .expect("Failed to encode object");
        self.raw(LogEntryType::Object, &payload)
    }

    /// Appends a tombstone for `object_version`, stored in `segment_id`.
    pub fn tombstone(
        self,
        table_id: TableId,
        key: &[u8],
        segment_id: u64,
        object_version: u64,
    ) -> Self {
        let payload = ObjectTombstone {
            table_id,
            key,
            segment_id,
            object_version,
            timestamp: 0,
        }
        .encode()
        .expect("Failed to encode tombstone");
        self.raw(LogEntryType::ObjectTombstone, &payload)
    }

    /// Appends an entry with an arbitrary payload.
    pub fn raw(mut self, entry_type: LogEntryType, payload: &[u8]) -> Self {
        self.last_entry = Some(self.buf.len());
        encode_entry(&mut self.buf, entry_type, payload);
        self
    }

    /// Flips a bit in the last payload byte of the most recent entry.
    pub fn corrupt_last(mut self) -> Self {
        if let Some(start) = self.last_entry {
            let end = self.buf.len();
            if end > start + entry_size(0) {
                self.buf[end - 1] ^= 0x01;
            }
        }
        self
    }

    /// Cuts `bytes` off the end of the buffer.
    pub fn truncate(mut self, bytes: usize) -> Self {
        let len = self.buf.len().saturating_sub(bytes);
        self.buf.truncate(len);
        self
    }

    /// Returns the buffer.
    pub fn build(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

/// Ownership authority that records what it was told.
#[derive(Debug, Default)]
pub struct RecordingAuthority {
    calls: Mutex<Vec<(ServerId, Vec<Tablet>)>>,
    refuse: Mutex<bool>,
}

impl RecordingAuthority {
    /// Creates an authority that accepts every hand-off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes later hand-offs fail.
    pub fn refuse(&self) {
        *self.refuse.lock() = true;
    }

    /// Every accepted hand-off, in order.
    pub fn recovered(&self) -> Vec<(ServerId, Vec<Tablet>)> {
        self.calls.lock().clone()
    }
}

impl OwnershipAuthority for RecordingAuthority {
    fn tablets_recovered(&self, master: ServerId, tablets: &[Tablet]) -> RecoveryResult<()> {
        if *self.refuse.lock() {
            return Err(RecoveryError::ownership("coordinator refused the tablets"));
        }
        self.calls.lock().push((master, tablets.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ramlog_core::entry::EntryIterator;

    #[test]
    fn node_writes_and_reads() {
        let node = TestNode::new(1);
        assert_eq!(node.write(TableId(1), b"k", b"v"), 1);
        assert_eq!(node.read(TableId(1), b"k").unwrap().data.as_ref(), b"v");
        node.log.sync().unwrap();
        assert!(!node.replicas.snapshots().is_empty());
    }

    #[test]
    fn builder_produces_valid_entries() {
        let buf = EntryBuilder::new()
            .object(TableId(1), b"a", 1, b"x")
            .tombstone(TableId(1), b"a", 4, 1)
            .build();
        let entries: Vec<_> = EntryIterator::new(&buf).map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.verify().is_ok()));
    }

    #[test]
    fn builder_corrupts_last_entry_only() {
        let buf = EntryBuilder::new()
            .object(TableId(1), b"a", 1, b"x")
            .object(TableId(1), b"b", 1, b"y")
            .corrupt_last()
            .build();
        let entries: Vec<_> = EntryIterator::new(&buf).map(|e| e.unwrap()).collect();
        assert!(entries[0].verify().is_ok());
        assert!(entries[1].verify().is_err());
    }

    #[test]
    fn authority_records_and_refuses() {
        let authority = RecordingAuthority::new();
        let tablets = vec![Tablet::whole_table(TableId(1))];
        authority.tablets_recovered(ServerId::new(2), &tablets).unwrap();
        authority.refuse();
        assert!(authority.tablets_recovered(ServerId::new(2), &tablets).is_err());
        assert_eq!(authority.recovered().len(), 1);
    }
}
