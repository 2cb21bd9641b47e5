//! Error types for the engine.

use driftsync_core::CoreError;
use driftsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Storage, archive or log error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Malformed operation or payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Another sync is running, remote ops are being applied, or the
    /// post-sync cooldown is active.
    #[error("sync not allowed now: {reason}")]
    SyncBusy {
        /// Why the sync was refused.
        reason: String,
    },

    /// The command bus worker has stopped.
    #[error("command bus closed")]
    CommandBusClosed,

    /// Not connected.
    #[error("not connected to sync peer")]
    NotConnected,
}

impl EngineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a sync-busy error.
    pub fn sync_busy(reason: impl Into<String>) -> Self {
        Self::SyncBusy {
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport { retryable, .. } => *retryable,
            EngineError::NotConnected => true,
            EngineError::Core(CoreError::Storage(_)) => true,
            _ => false,
        }
    }
}
