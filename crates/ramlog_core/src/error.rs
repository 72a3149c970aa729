//! Error types for the ramlog core.

use crate::entry::LogEntryType;
use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Errors that can occur in log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// No segment is available to satisfy the request.
    ///
    /// Callers may retry once the cleaner has reclaimed space.
    #[error("log out of memory: {message}")]
    OutOfMemory {
        /// What was being allocated.
        message: String,
    },

    /// Entry (or batch of entries) cannot fit in a single segment.
    #[error("entry too large: {size} bytes exceeds limit of {limit}")]
    EntryTooLarge {
        /// Requested size in bytes.
        size: usize,
        /// Maximum size in bytes.
        limit: usize,
    },

    /// Handle does not resolve to an entry of a segment in the log.
    #[error("invalid handle: segment {segment_id} offset {offset}")]
    InvalidHandle {
        /// Segment the handle refers to.
        segment_id: u64,
        /// Byte offset within that segment.
        offset: u32,
    },

    /// A handler is already registered for this entry type.
    #[error("entry type {0:?} already registered")]
    TypeAlreadyRegistered(LogEntryType),

    /// Entry type is reserved for the log itself.
    #[error("entry type {0:?} is reserved by the log")]
    ReservedType(LogEntryType),

    /// Segment was already closed.
    #[error("segment {segment_id} is closed")]
    SegmentClosed {
        /// The closed segment.
        segment_id: u64,
    },

    /// Segment has no room for the entry.
    #[error("segment {segment_id} full: {needed} bytes needed, {available} available")]
    SegmentFull {
        /// The full segment.
        segment_id: u64,
        /// Bytes requested.
        needed: usize,
        /// Bytes left before the footer reservation.
        available: usize,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored with the entry.
        expected: u32,
        /// Checksum computed over the bytes read.
        actual: u32,
    },

    /// Entry or segment bytes are structurally invalid.
    #[error("corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// Configuration cannot produce a working log.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Replication to backups failed.
    #[error("replication failed: {message}")]
    Replication {
        /// Description of the failure.
        message: String,
    },
}

impl LogError {
    /// Creates an out-of-memory error.
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::OutOfMemory {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a replication error.
    pub fn replication(message: impl Into<String>) -> Self {
        Self::Replication {
            message: message.into(),
        }
    }

    /// Returns true if the operation may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogError::OutOfMemory { .. })
    }
}
