//! # ramlog core
//!
//! Segmented in-memory log for a storage node.
//!
//! This crate provides:
//! - The entry format shared by every node (typed, checksummed entries)
//! - Fixed-capacity segments and the log digest
//! - The [`Log`]: head rotation, atomic single and multi-entry append,
//!   segment lifecycle lists, the emergency reserve
//! - Epoch-gated reclamation of cleaned segments
//! - A simple cost-benefit [`LogCleaner`]
//! - Replica manager and key index contracts, with in-memory implementations
//! - The [`ObjectManager`] write path over the log and index
//!
//! ## Invariants
//!
//! - A segment is in exactly one lifecycle list at a time
//! - Every append lands after all earlier appends in log position order
//! - A cleaned segment's memory is reused only after every operation that
//!   started before cleaning completed has finished

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod entry;
mod error;
mod index;
mod log;
mod objects;
mod replica;
pub mod segment;
mod types;

pub use config::{CleanerMode, LogConfig};
pub use entry::{LogEntry, LogEntryType};
pub use error::{LogError, LogResult};
pub use index::{MemoryIndex, ObjectIndex};
pub use log::{
    CleanerHandle, CleanerPass, EpochGuard, EpochTracker, ListSizes, Log, LogCleaner,
    LogEntryHandler, LogStats, SegmentSnapshot, TypeRegistration, EMERGENCY_CLEAN_SEGMENTS,
};
pub use objects::{timestamp_now, IndexedVersion, ObjectManager, ObjectRead};
pub use replica::{MemoryReplicaManager, NullReplicaManager, ReplicaManager, ReplicaSnapshot};
pub use segment::{LogDigest, Segment};
pub use types::{LogEntryHandle, LogPosition, ServerId, TableId};
