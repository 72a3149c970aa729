//! Contracts with the backups that hold segment replicas.

use crate::error::FetchError;
use bytes::Bytes;
use ramlog_core::ServerId;
use std::sync::Arc;

/// A session with one backup.
pub trait BackupClient: Send + Sync {
    /// Returns the entries of one replica that belong to a partition.
    ///
    /// The reply is a buffer of consecutive encoded entries, in the order
    /// they appear in the segment. Blocks until the backup answers.
    fn get_recovery_data(
        &self,
        crashed: ServerId,
        segment_id: u64,
        partition_id: u64,
    ) -> Result<Bytes, FetchError>;
}

/// Resolves backup ids to sessions.
pub trait BackupDirectory: Send + Sync {
    /// Opens (or reuses) a session with `backup`.
    ///
    /// Fails with [`FetchError::UnknownBackup`] or
    /// [`FetchError::Unreachable`] when no session can be had.
    fn session(&self, backup: ServerId) -> Result<Arc<dyn BackupClient>, FetchError>;
}
