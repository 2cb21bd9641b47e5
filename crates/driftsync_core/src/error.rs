//! Error types for driftsync core.

use driftsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] driftsync_storage::StorageError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] driftsync_codec::CodecError),

    /// Protocol record error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Archive task lookup miss.
    #[error("Archive task not found: {id}")]
    TaskNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// Safety backup lookup miss.
    #[error("safety backup not found: {id}")]
    BackupNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// A task update did not fit the task record.
    #[error("invalid update for task {id}: {message}")]
    InvalidTaskUpdate {
        /// Task id.
        id: String,
        /// What went wrong.
        message: String,
    },

    /// Stored data contradicts itself in a way that cannot be repaired.
    #[error("inconsistent archive data: {message}")]
    Inconsistent {
        /// Description of the inconsistency.
        message: String,
    },

    /// The operation log is damaged.
    #[error("operation log corrupted: {message}")]
    OplogCorrupted {
        /// Description of the damage.
        message: String,
    },

    /// An operation with this id is already logged.
    #[error("duplicate operation id: {op_id}")]
    DuplicateOperation {
        /// The duplicate id.
        op_id: String,
    },

    /// A full-state import failed.
    #[error("import failed: {message}")]
    ImportFailed {
        /// Description of the failure.
        message: String,
    },

    /// Restoring a safety backup failed.
    #[error("Failed to restore backup: {cause}")]
    RestoreFailed {
        /// The backup being restored.
        backup_id: String,
        /// The underlying failure.
        cause: String,
    },
}

impl CoreError {
    /// Creates a task-not-found error.
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    /// Creates an inconsistent-data error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }

    /// Creates an operation-log corruption error.
    pub fn oplog_corrupted(message: impl Into<String>) -> Self {
        Self::OplogCorrupted {
            message: message.into(),
        }
    }

    /// Creates an import failed error.
    pub fn import_failed(message: impl Into<String>) -> Self {
        Self::ImportFailed {
            message: message.into(),
        }
    }

    /// Returns true for lookup misses, which are surfaced and never retried.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TaskNotFound { .. } | Self::BackupNotFound { .. })
    }

    /// Returns true for errors caused by malformed incoming data.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::InvalidTaskUpdate { .. } | Self::Codec(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_task() {
        let err = CoreError::task_not_found("t-1");
        assert_eq!(err.to_string(), "Archive task not found: t-1");
        assert!(err.is_not_found());
        assert!(!err.is_validation());
    }

    #[test]
    fn restore_failure_carries_cause() {
        let err = CoreError::RestoreFailed {
            backup_id: "b".into(),
            cause: "disk full".into(),
        };
        assert_eq!(err.to_string(), "Failed to restore backup: disk full");
    }
}
