//! # ramlog recovery
//!
//! Crash recovery for ramlog storage nodes.
//!
//! When a node crashes its log survives only as replicas spread over
//! backups. A recovery master rebuilds one partition of the crashed node:
//! - A scoreboard tracks which replica of which segment has been tried
//! - Fetches run on a worker pool with a bounded number in flight
//! - Not-ready backups are asked again; failed replicas fall over to the next
//! - Each fetched segment is merged into the local log and index by version
//! - Ownership of the partition's tablets is claimed only once all of it is in
//!
//! ## Key Invariants
//!
//! - Every segment is replayed from exactly one successful replica
//! - At most one fetch per segment is in flight
//! - Replay converges to the newest version of every key, whatever the order
//!   and duplication of its entries
//! - A partition is recovered completely or not owned at all

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod config;
mod error;
mod master;
mod replay;
mod scoreboard;
mod tablet;
mod task;

pub use backup::{BackupClient, BackupDirectory};
pub use config::RecoveryConfig;
pub use error::{FetchError, RecoveryError, RecoveryResult};
pub use master::{RecoveryMaster, RecoveryStats};
pub use replay::{ReplayStats, SegmentReplayer};
pub use scoreboard::{Replica, ReplicaState};
pub use tablet::{key_hash, OwnershipAuthority, RecoverRequest, Tablet, TabletState};
