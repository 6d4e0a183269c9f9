//! Append-only progression journal.
//!
//! One JSON object per line for every component whose decoded payload
//! changed between a player's entry and finalize captures. The journal is an
//! audit trail; nothing reads it back during normal operation.

use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use sandbox_core::{BaselineRow, PendingContext, PlayerKey, ROW_FORMAT_VERSION, decode_payload, short_type_name};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Kind of component change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalOperation {
    /// Component appeared
    Add,
    /// Component disappeared
    Remove,
    /// Component payload changed
    Modify,
}

/// One journal line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEvent {
    /// Row schema version
    pub version: u32,
    /// Entry capture id
    pub snapshot_id: String,
    /// Canonical player key
    pub player_key: String,
    /// Character name at entry
    pub character_name: String,
    /// Platform account id
    pub platform_id: u64,
    /// Sandbox zone
    pub zone_id: String,
    /// Finalize time
    pub captured_at: DateTime<Utc>,
    /// Change kind
    pub operation: JournalOperation,
    /// Short component name
    pub component_type: String,
    /// Fully disambiguated type identity
    pub assembly_qualified_type: String,
    /// Decoded payload before the session, empty when absent
    pub before_json: String,
    /// Decoded payload after the session, empty when absent
    pub after_json: String,
}

/// JSON Lines journal file
#[derive(Debug, Clone)]
pub struct ProgressionJournal {
    path: PathBuf,
}

impl ProgressionJournal {
    /// Journal at `path`; the file is created on first append
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Journal file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events describing how the post capture differs from the pending one
    ///
    /// Ordered by qualified type.
    #[must_use]
    pub fn events(
        key: &PlayerKey,
        pending: &PendingContext,
        post_rows: &[BaselineRow],
        at: DateTime<Utc>,
    ) -> Vec<JournalEvent> {
        let before = present_by_type(&pending.component_rows);
        let after = present_by_type(post_rows);

        let mut types: Vec<&str> = before.keys().chain(after.keys()).copied().collect();
        types.sort_unstable();
        types.dedup();

        let header = &pending.header;
        types
            .into_iter()
            .filter_map(|qualified_type| {
                let before_row = before.get(qualified_type);
                let after_row = after.get(qualified_type);
                let before_json = before_row.map(|row| decoded_text(row)).unwrap_or_default();
                let after_json = after_row.map(|row| decoded_text(row)).unwrap_or_default();
                if before_json == after_json {
                    return None;
                }

                let operation = match (before_row, after_row) {
                    (None, _) => JournalOperation::Add,
                    (_, None) => JournalOperation::Remove,
                    _ => JournalOperation::Modify,
                };

                Some(JournalEvent {
                    version: ROW_FORMAT_VERSION,
                    snapshot_id: header.snapshot_id.to_string(),
                    player_key: key.to_string(),
                    character_name: header.character_name.clone(),
                    platform_id: header.platform_id,
                    zone_id: header.zone_id.clone(),
                    captured_at: at,
                    operation,
                    component_type: short_type_name(qualified_type).to_string(),
                    assembly_qualified_type: qualified_type.to_string(),
                    before_json,
                    after_json,
                })
            })
            .collect()
    }

    /// Append the events for one finalized session
    ///
    /// Returns the number of lines written.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or written
    pub fn append(
        &self,
        key: &PlayerKey,
        pending: &PendingContext,
        post_rows: &[BaselineRow],
        at: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let events = Self::events(key, pending, post_rows, at);
        if events.is_empty() {
            return Ok(0);
        }

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::io(&self.path, e))?;
        let mut writer = BufWriter::new(file);

        for event in &events {
            let line = serde_json::to_string(event).map_err(|e| StorageError::Journal {
                reason: e.to_string(),
            })?;
            writeln!(writer, "{line}").map_err(|e| StorageError::io(&self.path, e))?;
        }
        writer.flush().map_err(|e| StorageError::io(&self.path, e))?;

        debug!(player_key = %key, events = events.len(), "Journal appended");
        Ok(events.len())
    }

    /// Read every event; a missing file has none
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or a line is not an event
    pub fn read_all(&self) -> StorageResult<Vec<JournalEvent>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| StorageError::Journal {
                    reason: format!("line {}: {e}", i + 1),
                })
            })
            .collect()
    }
}

fn present_by_type(rows: &[BaselineRow]) -> BTreeMap<&str, &BaselineRow> {
    rows.iter()
        .filter(|row| row.existed)
        .map(|row| (row.qualified_type.as_str(), row))
        .collect()
}

fn decoded_text(row: &BaselineRow) -> String {
    decode_payload(&row.payload_base64)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
