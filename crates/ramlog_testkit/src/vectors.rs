//! Byte-exact vectors for the entry format.
//!
//! Every node must produce and accept exactly these encodings; replicas
//! written by one node are replayed by another.

use ramlog_core::entry::{encode_entry, Object, ObjectTombstone};
use ramlog_core::segment::SegmentHeader;
use ramlog_core::{LogDigest, LogEntryType, ServerId, TableId};

/// One encoded entry and its expected bytes.
#[derive(Debug, Clone)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Entry type.
    pub entry_type: LogEntryType,
    /// Payload to encode.
    pub payload: Vec<u8>,
    /// Expected encoded entry (hex).
    pub expected_hex: &'static str,
}

impl TestVector {
    /// Encodes the payload as a full entry.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_entry(&mut buf, self.entry_type, &self.payload);
        buf
    }
}

/// Vectors covering each entry type the log writes.
pub fn entry_vectors() -> Vec<TestVector> {
    vec![
        TestVector {
            id: "object_small",
            description: "object table 1, key \"k\", version 1, value \"v\"",
            entry_type: LogEntryType::Object,
            payload: Object {
                table_id: TableId(1),
                key: b"k",
                version: 1,
                timestamp: 0,
                data: b"v",
            }
            .encode()
            .expect("Failed to encode object"),
            expected_hex: "0418000000796b54e2010000000000000001000000000000000000000001006b76",
        },
        TestVector {
            id: "tombstone_small",
            description: "tombstone for object version 1 of key \"k\" in segment 3",
            entry_type: LogEntryType::ObjectTombstone,
            payload: ObjectTombstone {
                table_id: TableId(1),
                key: b"k",
                segment_id: 3,
                object_version: 1,
                timestamp: 0,
            }
            .encode()
            .expect("Failed to encode tombstone"),
            expected_hex:
                "051f000000c16e3b5b0100000000000000030000000000000001000000000000000000000001006b",
        },
        TestVector {
            id: "digest_two",
            description: "log digest naming segments 1 and 2",
            entry_type: LogEntryType::LogDigest,
            payload: LogDigest::new(vec![1, 2]).encode(),
            expected_hex: "0314000000deb9ccec0200000001000000000000000200000000000000",
        },
        TestVector {
            id: "segment_header",
            description: "header of segment 3 in log 7, 8 KiB capacity",
            entry_type: LogEntryType::SegmentHeader,
            payload: SegmentHeader {
                log_id: ServerId::new(7),
                segment_id: 3,
                capacity: 8192,
            }
            .encode()
            .to_vec(),
            expected_hex: "0114000000604dbef40700000000000000030000000000000000200000",
        },
        TestVector {
            id: "object_empty_payload",
            description: "entry with an empty payload",
            entry_type: LogEntryType::Object,
            payload: Vec::new(),
            expected_hex: "0400000000dd51a233",
        },
    ]
}

/// Lower-case hex encoding.
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
