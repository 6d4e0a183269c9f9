//! Runtime error types.

use sandbox_core::CoreError;
use sandbox_storage::StorageError;

/// Runtime result type
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Runtime error type
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Capture or restore failed
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Persistence failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Sessions are switched off in configuration
    #[error("Sandbox sessions are disabled")]
    Disabled,

    /// Background task panicked or was cancelled
    #[error("Background task failed: {reason}")]
    Task {
        /// Join error message
        reason: String,
    },
}
