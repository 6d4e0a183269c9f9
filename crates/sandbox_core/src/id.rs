//! Player and snapshot identifiers.
//!
//! Keys are derived from the player's real identity, never from transient
//! simulation handles, so a reconnecting player resolves to the same entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical store key for one real player
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerKey(String);

impl PlayerKey {
    /// Derive the key for `(character_name, platform_id)`
    ///
    /// The name is trimmed; an empty name falls back to the platform id.
    #[must_use]
    pub fn derive(character_name: &str, platform_id: u64) -> Self {
        let name = normalize_name(character_name, platform_id);
        Self(format!("{name}|{platform_id}"))
    }

    /// Wrap a key read back from a persisted row
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if the key is blank
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for PlayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PlayerKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of one capture, shared by its baseline and delta rows
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Build `{yyyyMMddHHmmssfff}_{name}_{platform_id}`
    #[must_use]
    pub fn build(platform_id: u64, character_name: &str, captured_at: DateTime<Utc>) -> Self {
        let name = normalize_name(character_name, platform_id).replace('|', "_");
        Self(format!(
            "{}_{}_{}",
            captured_at.format("%Y%m%d%H%M%S%3f"),
            name,
            platform_id
        ))
    }

    /// Wrap an id read back from a persisted row
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The real-world identity of a player
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerIdentity {
    /// Character display name
    pub character_name: String,
    /// Platform account id
    pub platform_id: u64,
}

impl PlayerIdentity {
    /// Create a new identity
    #[must_use]
    pub fn new(character_name: impl Into<String>, platform_id: u64) -> Self {
        Self {
            character_name: character_name.into(),
            platform_id,
        }
    }

    /// Canonical store key
    #[must_use]
    pub fn key(&self) -> PlayerKey {
        PlayerKey::derive(&self.character_name, self.platform_id)
    }
}

fn normalize_name(character_name: &str, platform_id: u64) -> String {
    let trimmed = character_name.trim();
    if trimmed.is_empty() {
        platform_id.to_string()
    } else {
        trimmed.to_string()
    }
}
