//! Error types for protocol records.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while building or interpreting operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// An operation payload does not match its action type.
    #[error("invalid payload for {action_type}: {message}")]
    InvalidPayload {
        /// The action type whose payload failed.
        action_type: String,
        /// What went wrong.
        message: String,
    },

    /// An operation record is structurally invalid.
    #[error("invalid operation {op_id}: {reason}")]
    InvalidOperation {
        /// Id of the offending operation.
        op_id: String,
        /// What went wrong.
        reason: String,
    },
}

impl ProtocolError {
    /// Create an invalid payload error.
    pub fn invalid_payload(action_type: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidPayload {
            action_type: action_type.into(),
            message: message.to_string(),
        }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(op_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            op_id: op_id.into(),
            reason: reason.into(),
        }
    }
}
