//! Errors raised while decoding payloads inside derived detectors.
//!
//! Detectors never return these to the caller. They are logged and the
//! offending row is skipped.

use sandbox_core::CoreError;

/// Delta result type
pub type DeltaResult<T> = Result<T, DeltaError>;

/// Payload decoding failure
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    /// Payload column is not valid base64
    #[error("{component_type}: {source}")]
    Encoding {
        /// Component the row describes
        component_type: String,
        /// Underlying decode error
        #[source]
        source: CoreError,
    },

    /// Decoded payload is not JSON
    #[error("{component_type}: payload is not JSON: {source}")]
    Json {
        /// Component the row describes
        component_type: String,
        /// Parser error
        #[source]
        source: serde_json::Error,
    },
}

impl DeltaError {
    /// Component the failing row describes
    #[must_use]
    pub fn component_type(&self) -> &str {
        match self {
            Self::Encoding { component_type, .. } | Self::Json { component_type, .. } => component_type,
        }
    }
}
