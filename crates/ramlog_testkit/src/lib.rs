//! # ramlog testkit
//!
//! Test utilities for ramlog.
//!
//! This crate provides:
//! - Storage node fixtures and recovery buffer builders
//! - Scripted in-memory backups for driving recoveries
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//! - Byte-exact vectors for the entry format
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ramlog_testkit::prelude::*;
//!
//! #[test]
//! fn recovers_a_node() {
//!     let crashed = TestNode::new(1);
//!     crashed.write(TableId(1), b"k", b"v");
//!     crashed.log.sync().unwrap();
//!     // ... hand crashed.replicas.snapshots() to a MockBackupCluster
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backup;
pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod vectors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backup::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::vectors::*;
}

pub use backup::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use vectors::*;
