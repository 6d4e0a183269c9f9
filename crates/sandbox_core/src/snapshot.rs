//! Per-player snapshots built from rows.
//!
//! A snapshot is the set of rows belonging to one player and one capture.
//! Persisted files are flat row lists; [`group_baseline_rows`] and
//! [`group_delta_rows`] rebuild the per-player view when loading.

use crate::error::CoreResult;
use crate::id::{PlayerIdentity, PlayerKey, SnapshotId};
use crate::record::{BaselineRow, ComponentState, DeltaKind, DeltaRow, EntityEntry, ROW_FORMAT_VERSION, RowContext};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity and capture context of one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Canonical player key
    pub player_key: PlayerKey,
    /// Character name at capture time
    pub character_name: String,
    /// Platform account id
    pub platform_id: u64,
    /// Sandbox zone
    pub zone_id: String,
    /// Capture id
    pub snapshot_id: SnapshotId,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

impl SnapshotHeader {
    /// Header for a fresh capture of `identity`
    #[must_use]
    pub fn new(identity: &PlayerIdentity, zone_id: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            player_key: identity.key(),
            character_name: identity.character_name.clone(),
            platform_id: identity.platform_id,
            zone_id: zone_id.into(),
            snapshot_id: SnapshotId::build(identity.platform_id, &identity.character_name, captured_at),
            captured_at,
        }
    }

    /// Header read back from a row
    #[must_use]
    pub fn from_context(context: &RowContext) -> Self {
        Self {
            player_key: context.player_key.clone(),
            character_name: context.character_name.clone(),
            platform_id: context.platform_id,
            zone_id: context.zone_id.clone(),
            snapshot_id: context.snapshot_id.clone(),
            captured_at: context.captured_at,
        }
    }

    /// Player identity recorded in the header
    #[must_use]
    pub fn identity(&self) -> PlayerIdentity {
        PlayerIdentity::new(self.character_name.clone(), self.platform_id)
    }

    /// Context stamped into every row of this snapshot
    #[must_use]
    pub fn row_context(&self) -> RowContext {
        RowContext {
            version: ROW_FORMAT_VERSION,
            snapshot_id: self.snapshot_id.clone(),
            player_key: self.player_key.clone(),
            character_name: self.character_name.clone(),
            platform_id: self.platform_id,
            zone_id: self.zone_id.clone(),
            captured_at: self.captured_at,
        }
    }
}

/// Pre-sandbox state of one player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineSnapshot {
    /// Capture identity
    pub header: SnapshotHeader,
    /// One row per captured component
    pub rows: Vec<BaselineRow>,
}

impl BaselineSnapshot {
    /// Build rows from captured component states
    #[must_use]
    pub fn from_states(header: SnapshotHeader, states: &[ComponentState]) -> Self {
        let context = header.row_context();
        let rows = states
            .iter()
            .map(|state| BaselineRow::from_state(context.clone(), state))
            .collect();
        Self { header, rows }
    }

    /// Restorable state per qualified type
    ///
    /// A later row for the same type replaces an earlier one.
    ///
    /// # Errors
    ///
    /// Returns error if a payload column is not valid base64
    pub fn component_states(&self) -> CoreResult<BTreeMap<String, ComponentState>> {
        let mut states = BTreeMap::new();
        for row in &self.rows {
            states.insert(row.qualified_type.clone(), row.to_state()?);
        }
        Ok(states)
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Changes observed over one sandbox session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSnapshot {
    /// Shares the baseline's snapshot id
    pub header: SnapshotHeader,
    /// Component, entity and detector rows in that order
    pub rows: Vec<DeltaRow>,
}

impl DeltaSnapshot {
    /// Create a new delta snapshot
    #[must_use]
    pub fn new(header: SnapshotHeader, rows: Vec<DeltaRow>) -> Self {
        Self { header, rows }
    }

    /// Rows of one kind
    pub fn rows_of<'a>(&'a self, kind: &'a DeltaKind) -> impl Iterator<Item = &'a DeltaRow> + 'a {
        self.rows.iter().filter(move |row| &row.kind == kind)
    }

    /// Rows describing entity lifecycle, for cleanup on exit
    #[must_use]
    pub fn entity_rows(&self) -> Vec<DeltaRow> {
        self.rows
            .iter()
            .filter(|row| row.entity_index().is_some())
            .cloned()
            .collect()
    }

    /// Number of rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A baseline captured on entry, waiting to be finalized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingContext {
    /// Entry capture identity
    pub header: SnapshotHeader,
    /// Components captured on entry
    pub component_rows: Vec<BaselineRow>,
    /// Zone entities present at entry
    pub entities: Vec<EntityEntry>,
}

impl PendingContext {
    /// Create a new pending context
    #[must_use]
    pub fn new(header: SnapshotHeader, component_rows: Vec<BaselineRow>, entities: Vec<EntityEntry>) -> Self {
        Self {
            header,
            component_rows,
            entities,
        }
    }

    /// The baseline this context will become
    #[must_use]
    pub fn baseline(&self) -> BaselineSnapshot {
        BaselineSnapshot {
            header: self.header.clone(),
            rows: self.component_rows.clone(),
        }
    }
}

/// Rebuild per-player baselines from a flat row list
#[must_use]
pub fn group_baseline_rows(rows: Vec<BaselineRow>) -> Vec<BaselineSnapshot> {
    group_rows(rows, |row| &row.context)
        .into_iter()
        .map(|(header, rows)| BaselineSnapshot { header, rows })
        .collect()
}

/// Rebuild per-player deltas from a flat row list
#[must_use]
pub fn group_delta_rows(rows: Vec<DeltaRow>) -> Vec<DeltaSnapshot> {
    group_rows(rows, |row| &row.context)
        .into_iter()
        .map(|(header, rows)| DeltaSnapshot { header, rows })
        .collect()
}

fn group_rows<R>(rows: Vec<R>, context: impl Fn(&R) -> &RowContext) -> Vec<(SnapshotHeader, Vec<R>)> {
    let mut groups: BTreeMap<PlayerKey, Vec<R>> = BTreeMap::new();
    for row in rows {
        let key = resolve_row_key(context(&row));
        groups.entry(key).or_default().push(row);
    }

    groups
        .into_iter()
        .filter_map(|(key, mut rows)| {
            rows.sort_by_key(|row| context(row).captured_at);
            let mut header = SnapshotHeader::from_context(context(rows.first()?));
            header.player_key = key;
            Some((header, rows))
        })
        .collect()
}

fn resolve_row_key(context: &RowContext) -> PlayerKey {
    if context.player_key.is_empty() {
        PlayerKey::derive(&context.character_name, context.platform_id)
    } else {
        context.player_key.clone()
    }
}
