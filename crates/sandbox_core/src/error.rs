//! Core error types for sandbox snapshots.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Payload column is not valid base64
    #[error("Invalid payload encoding: {reason}")]
    Payload {
        /// Decoder message
        reason: String,
    },

    /// Delta row carries a payload shape its kind does not allow
    #[error("{shape} payload not allowed for row kind {kind}")]
    InvalidShape {
        /// Wire name of the row kind
        kind: String,
        /// Shape that was found
        shape: &'static str,
    },

    /// Capture source failed to read live state
    #[error("Capture failed: {reason}")]
    Capture {
        /// Failure reason
        reason: String,
    },

    /// Restore applier failed to mutate live state
    #[error("Restore failed: {reason}")]
    Restore {
        /// Failure reason
        reason: String,
    },
}
