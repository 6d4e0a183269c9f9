//! Payload hashing and base64 transport encoding.
//!
//! Component payloads travel as standard base64 text. Equality checks use a
//! SHA-256 digest of the decoded bytes, rendered as upper-case hex.

use crate::error::{CoreError, CoreResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest of a decoded component payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PayloadHash([u8; 32]);

impl PayloadHash {
    /// The number of bytes in a digest
    pub const LEN: usize = 32;

    /// Hash decoded payload bytes
    #[must_use]
    pub fn compute(payload: &[u8]) -> Self {
        Self(Sha256::digest(payload).into())
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Upper-case hex form, as stored in the `payload_hash` column
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Parse from hex in either case
    ///
    /// # Errors
    ///
    /// Returns error if hex is invalid or not 32 bytes
    pub fn from_hex(text: &str) -> CoreResult<Self> {
        let bytes = hex::decode(text).map_err(|e| CoreError::Payload {
            reason: format!("payload hash is not hex: {e}"),
        })?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| CoreError::Payload {
            reason: format!("payload hash has {} bytes, expected 32", bytes.len()),
        })?;
        Ok(Self(arr))
    }

    /// Check if the digest matches the payload
    #[must_use]
    pub fn verify(&self, payload: &[u8]) -> bool {
        Self::compute(payload) == *self
    }
}

impl fmt::Display for PayloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Encode payload bytes for the `payload_base64` columns
#[must_use]
pub fn encode_payload(payload: &[u8]) -> String {
    BASE64.encode(payload)
}

/// Decode a `payload_base64` column
///
/// An empty column decodes to an empty payload.
///
/// # Errors
///
/// Returns error if the text is not valid standard base64
pub fn decode_payload(text: &str) -> CoreResult<Vec<u8>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    BASE64.decode(trimmed).map_err(|e| CoreError::Payload {
        reason: e.to_string(),
    })
}
