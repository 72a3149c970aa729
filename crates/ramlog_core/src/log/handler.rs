//! Per-entry-type callbacks used by the cleaner.

use crate::entry::{LogEntry, LogEntryType};
use crate::types::LogEntryHandle;
use std::fmt;
use std::sync::Arc;

/// Callbacks the log uses to manage entries of one registered type.
///
/// The log never invokes a handler while holding its own lock, so
/// implementations may call back into the log.
pub trait LogEntryHandler: Send + Sync {
    /// Returns true if the entry is still needed.
    fn is_live(&self, entry: &LogEntry) -> bool;

    /// Called after the cleaner copied `old` to `new`.
    ///
    /// Returns true to keep the copy. Returning false marks the copy dead;
    /// the cleaner then frees it.
    fn relocate(&self, old: &LogEntry, new: LogEntryHandle) -> bool;

    /// Creation time of the entry in seconds since the Unix epoch.
    fn timestamp(&self, entry: &LogEntry) -> u32;
}

/// A handler bound to an entry type.
#[derive(Clone)]
pub struct TypeRegistration {
    /// Type the handler manages.
    pub entry_type: LogEntryType,
    /// Whether owners call [`Log::free`](crate::Log::free) for dead entries
    /// of this type.
    pub explicitly_freed: bool,
    /// The callbacks.
    pub handler: Arc<dyn LogEntryHandler>,
}

impl fmt::Debug for TypeRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistration")
            .field("entry_type", &self.entry_type)
            .field("explicitly_freed", &self.explicitly_freed)
            .finish_non_exhaustive()
    }
}
