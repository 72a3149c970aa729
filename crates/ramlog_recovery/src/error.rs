//! Error types for crash recovery.

use ramlog_core::{LogError, ServerId};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for recovery operations.
pub type RecoveryResult<T> = Result<T, RecoveryError>;

/// Errors that can end a recovery.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Every replica of some segment failed.
    #[error("partition {partition_id} of {crashed}: no usable replica for segments {segments:?}")]
    UnrecoverableSegments {
        /// The crashed server.
        crashed: ServerId,
        /// The partition being recovered.
        partition_id: u64,
        /// Segments with no successful replica.
        segments: Vec<u64>,
    },

    /// The local log rejected an operation.
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Fetch workers could not be started.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Recovery data is structurally invalid.
    #[error("corrupt recovery data for segment {segment_id:?}: {message}")]
    CorruptSegment {
        /// Segment the data came from; `None` for migrated data.
        segment_id: Option<u64>,
        /// Description of the corruption.
        message: String,
    },

    /// The ownership authority refused the recovered tablets.
    #[error("ownership update failed: {message}")]
    Ownership {
        /// Description of the failure.
        message: String,
    },

    /// Request cannot be carried out.
    #[error("invalid recovery request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// Configuration cannot drive a recovery.
    #[error("invalid recovery configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl RecoveryError {
    /// Creates a corrupt segment error.
    pub fn corrupt_segment(segment_id: Option<u64>, message: impl Into<String>) -> Self {
        Self::CorruptSegment {
            segment_id,
            message: message.into(),
        }
    }

    /// Creates an ownership error.
    pub fn ownership(message: impl Into<String>) -> Self {
        Self::Ownership {
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Why fetching one replica failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The backup has not finished loading the replica yet.
    #[error("backup not ready")]
    NotReady,

    /// The backup cannot be reached.
    #[error("backup {backup} unreachable: {message}")]
    Unreachable {
        /// The backup.
        backup: ServerId,
        /// Transport message.
        message: String,
    },

    /// No session can be opened to this backup id.
    #[error("unknown backup {0}")]
    UnknownBackup(ServerId),

    /// The backup answered with an error.
    #[error("backup request failed: {0}")]
    Request(String),

    /// No answer arrived in time.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Creates an unreachable error.
    pub fn unreachable(backup: ServerId, message: impl Into<String>) -> Self {
        Self::Unreachable {
            backup,
            message: message.into(),
        }
    }

    /// Returns true if the same replica should be asked again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_not_ready_is_retried() {
        assert!(FetchError::NotReady.is_retryable());
        assert!(!FetchError::unreachable(ServerId::new(2), "refused").is_retryable());
        assert!(!FetchError::UnknownBackup(ServerId::new(2)).is_retryable());
        assert!(!FetchError::Request("bad segment".into()).is_retryable());
        assert!(!FetchError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn unrecoverable_message_names_segments() {
        let err = RecoveryError::UnrecoverableSegments {
            crashed: ServerId::new(99),
            partition_id: 0,
            segments: vec![9],
        };
        assert_eq!(
            err.to_string(),
            "partition 0 of server:99: no usable replica for segments [9]"
        );
    }

    #[test]
    fn log_errors_convert() {
        let err: RecoveryError = LogError::out_of_memory("head").into();
        assert!(matches!(err, RecoveryError::Log(_)));
    }
}
