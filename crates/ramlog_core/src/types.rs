//! Core type definitions for ramlog.

use crate::entry::LogEntryType;
use std::fmt;

/// Identifier of a storage node (master or backup).
///
/// A master's server id doubles as the id of its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ServerId(pub u64);

impl ServerId {
    /// Creates a new server ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server:{}", self.0)
    }
}

/// Identifier of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TableId(pub u64);

impl TableId {
    /// Creates a new table ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// A position in the log: segment id then byte offset within the segment.
///
/// Positions are totally ordered; every append lands at a position greater
/// than all earlier appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogPosition {
    /// Segment id.
    pub segment_id: u64,
    /// Byte offset within the segment.
    pub offset: u32,
}

impl LogPosition {
    /// Creates a new log position.
    #[must_use]
    pub const fn new(segment_id: u64, offset: u32) -> Self {
        Self { segment_id, offset }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos:{}.{}", self.segment_id, self.offset)
    }
}

/// Reference to an entry stored in the log.
///
/// A handle is only meaningful while its segment is part of the log. Once the
/// segment has been cleaned and reclaimed, resolving the handle fails rather
/// than yielding another entry's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogEntryHandle {
    segment_id: u64,
    offset: u32,
    entry_type: LogEntryType,
}

impl LogEntryHandle {
    /// Creates a handle for the entry at `offset` of segment `segment_id`.
    #[must_use]
    pub const fn new(segment_id: u64, offset: u32, entry_type: LogEntryType) -> Self {
        Self {
            segment_id,
            offset,
            entry_type,
        }
    }

    /// Returns the id of the segment holding the entry.
    #[must_use]
    pub const fn segment_id(self) -> u64 {
        self.segment_id
    }

    /// Returns the byte offset of the entry header within its segment.
    #[must_use]
    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Returns the type of the referenced entry.
    #[must_use]
    pub const fn entry_type(self) -> LogEntryType {
        self.entry_type
    }

    /// Returns the log position of the entry.
    #[must_use]
    pub const fn position(self) -> LogPosition {
        LogPosition::new(self.segment_id, self.offset)
    }
}

impl fmt::Display for LogEntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}@{}.{}",
            self.entry_type, self.segment_id, self.offset
        )
    }
}
