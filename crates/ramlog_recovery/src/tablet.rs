//! Tablets and the ownership hand-off at the end of a recovery.

use crate::error::RecoveryResult;
use crate::scoreboard::Replica;
use ramlog_core::{LogPosition, ServerId, TableId};
use std::fmt;

/// Whether a tablet serves requests yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TabletState {
    /// Being rebuilt; not served.
    #[default]
    Recovering,
    /// Owned and served.
    Normal,
}

/// A contiguous key-hash range of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tablet {
    /// Table the range belongs to.
    pub table_id: TableId,
    /// First key hash in the range.
    pub start_key_hash: u64,
    /// Last key hash in the range, inclusive.
    pub end_key_hash: u64,
    /// Serving state.
    pub state: TabletState,
    /// Owning server.
    pub server_id: ServerId,
    /// Log position at which this owner took the tablet over. Entries for the
    /// tablet before this position belong to an earlier owner.
    pub ctime: LogPosition,
}

impl Tablet {
    /// Creates a recovering tablet with no owner yet.
    #[must_use]
    pub fn new(table_id: TableId, start_key_hash: u64, end_key_hash: u64) -> Self {
        Self {
            table_id,
            start_key_hash,
            end_key_hash,
            state: TabletState::Recovering,
            server_id: ServerId::default(),
            ctime: LogPosition::default(),
        }
    }

    /// A tablet covering the whole of `table_id`.
    #[must_use]
    pub fn whole_table(table_id: TableId) -> Self {
        Self::new(table_id, 0, u64::MAX)
    }

    /// Returns true if `key` of `table_id` falls in this tablet.
    #[must_use]
    pub fn contains(&self, table_id: TableId, key: &[u8]) -> bool {
        let hash = key_hash(key);
        self.table_id == table_id && self.start_key_hash <= hash && hash <= self.end_key_hash
    }
}

impl fmt::Display for Tablet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{:#x}..={:#x}]",
            self.table_id, self.start_key_hash, self.end_key_hash
        )
    }
}

/// 64-bit FNV-1a hash used to place keys in tablets.
#[must_use]
pub fn key_hash(key: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    key.iter()
        .fold(OFFSET, |hash, &b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}

/// Whoever decides tablet ownership.
pub trait OwnershipAuthority: Send + Sync {
    /// Records that `master` now owns `tablets`.
    fn tablets_recovered(&self, master: ServerId, tablets: &[Tablet]) -> RecoveryResult<()>;
}

/// Everything needed to recover one partition of a crashed server.
#[derive(Debug, Clone)]
pub struct RecoverRequest {
    /// The crashed server.
    pub crashed: ServerId,
    /// Partition to rebuild.
    pub partition_id: u64,
    /// Tablets making up the partition.
    pub tablets: Vec<Tablet>,
    /// Every known replica of every segment of the crashed log.
    pub replicas: Vec<Replica>,
}
