//! Property-based test generators using proptest.

use crate::fixtures::EntryBuilder;
use bytes::Bytes;
use proptest::prelude::*;
use ramlog_core::TableId;

/// Strategy for keys drawn from a small alphabet so that histories collide.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(b'a'..=b'd', 1..3)
}

/// Strategy for object values.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// One entry of a recovery buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOp {
    /// An object version.
    Object {
        /// Key.
        key: Vec<u8>,
        /// Version.
        version: u64,
    },
    /// A tombstone for an object version.
    Tombstone {
        /// Key.
        key: Vec<u8>,
        /// Deleted object version.
        version: u64,
    },
}

impl ReplayOp {
    /// Key the entry is for.
    pub fn key(&self) -> &[u8] {
        match self {
            ReplayOp::Object { key, .. } | ReplayOp::Tombstone { key, .. } => key,
        }
    }

    /// Rank of the entry among entries for the same key; the highest rank
    /// survives replay. A tombstone outranks the object version it deletes.
    pub fn rank(&self) -> (u64, bool) {
        match self {
            ReplayOp::Object { version, .. } => (*version, false),
            ReplayOp::Tombstone { version, .. } => (*version, true),
        }
    }
}

/// Strategy for a single replay entry.
pub fn replay_op_strategy() -> impl Strategy<Value = ReplayOp> {
    prop_oneof![
        3 => (key_strategy(), 0u64..16)
            .prop_map(|(key, version)| ReplayOp::Object { key, version }),
        1 => (key_strategy(), 0u64..16)
            .prop_map(|(key, version)| ReplayOp::Tombstone { key, version }),
    ]
}

/// Strategy for a history of entries over a few keys.
pub fn replay_history_strategy() -> impl Strategy<Value = Vec<ReplayOp>> {
    prop::collection::vec(replay_op_strategy(), 1..64)
}

/// Encodes `ops` for `table_id` as one recovery buffer.
///
/// An object's value is its version, so equal versions are exact copies.
pub fn build_buffer(table_id: TableId, ops: &[ReplayOp]) -> Bytes {
    ops.iter()
        .fold(EntryBuilder::new(), |builder, op| match op {
            ReplayOp::Object { key, version } => {
                builder.object(table_id, key, *version, &version.to_le_bytes())
            }
            ReplayOp::Tombstone { key, version } => builder.tombstone(table_id, key, 1, *version),
        })
        .build()
}
