//! Derived detectors.
//!
//! A derived detector looks inside decoded payloads for domain events that a
//! byte-level comparison cannot name. Detectors are additive: their rows are
//! appended to the structural delta, never substituted for it.

use crate::error::{DeltaError, DeltaResult};
use sandbox_core::{BaselineRow, DeltaRow, decode_payload};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Key fragments that mark a JSON number as an unlock id
pub const UNLOCK_KEY_MARKERS: [&str; 4] = ["guid", "prefab", "tech", "unlock"];

/// A semantic change detector over decoded component payloads
pub trait DerivedDetector: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Rows for changes between the two captures
    ///
    /// Undecodable payloads are logged and skipped.
    fn detect(&self, pre: &[BaselineRow], post: &[BaselineRow]) -> Vec<DeltaRow>;
}

/// Emits `tech_opened` for unlock ids that appear during a session
#[derive(Debug, Clone, Default)]
pub struct OpenedTechDetector {
    unlock_components: BTreeSet<String>,
    catalog: BTreeMap<i64, String>,
}

impl OpenedTechDetector {
    /// Detector that scans every component
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict scanning to one component, by short or qualified name
    #[must_use]
    pub fn with_unlock_component(mut self, component: impl Into<String>) -> Self {
        self.unlock_components.insert(component.into());
        self
    }

    /// Restrict scanning to several components
    #[must_use]
    pub fn with_unlock_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unlock_components
            .extend(components.into_iter().map(Into::into));
        self
    }

    /// Display names for known ids
    #[must_use]
    pub fn with_catalog(mut self, catalog: BTreeMap<i64, String>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Display name of an id, `GUID:{id}` when uncatalogued
    #[must_use]
    pub fn tech_name(&self, tech_id: i64) -> String {
        self.catalog
            .get(&tech_id)
            .cloned()
            .unwrap_or_else(|| format!("GUID:{tech_id}"))
    }

    /// Union of unlock ids found in the tracked rows
    #[must_use]
    pub fn unlock_set(&self, rows: &[BaselineRow]) -> BTreeSet<i64> {
        let mut ids = BTreeSet::new();
        for row in rows.iter().filter(|row| self.tracks(row)) {
            match unlock_ids(row) {
                Ok(found) => ids.extend(found),
                Err(e) => warn!(
                    detector = self.name(),
                    snapshot_id = %row.context.snapshot_id,
                    component_type = e.component_type(),
                    error = %e,
                    "Skipping undecodable payload"
                ),
            }
        }
        ids
    }

    fn tracks(&self, row: &BaselineRow) -> bool {
        row.existed
            && (self.unlock_components.is_empty()
                || self.unlock_components.contains(&row.component_type)
                || self.unlock_components.contains(&row.qualified_type))
    }
}

impl DerivedDetector for OpenedTechDetector {
    fn name(&self) -> &str {
        "opened_tech"
    }

    fn detect(&self, pre: &[BaselineRow], post: &[BaselineRow]) -> Vec<DeltaRow> {
        let before = self.unlock_set(pre);
        self.unlock_set(post)
            .difference(&before)
            .map(|&tech_id| DeltaRow::tech_opened(tech_id, self.tech_name(tech_id)))
            .collect()
    }
}

/// Opened-tech rows using a detector that scans every component
#[must_use]
pub fn extract_opened_tech(pre: &[BaselineRow], post: &[BaselineRow]) -> Vec<DeltaRow> {
    OpenedTechDetector::new().detect(pre, post)
}

fn unlock_ids(row: &BaselineRow) -> DeltaResult<BTreeSet<i64>> {
    let mut ids = BTreeSet::new();
    if row.payload_base64.trim().is_empty() {
        return Ok(ids);
    }

    let bytes = decode_payload(&row.payload_base64).map_err(|source| DeltaError::Encoding {
        component_type: row.component_type.clone(),
        source,
    })?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|source| DeltaError::Json {
        component_type: row.component_type.clone(),
        source,
    })?;

    collect_ids(&value, "", &mut ids);
    Ok(ids)
}

/// Array items inherit the key of the array
fn collect_ids(value: &Value, key: &str, ids: &mut BTreeSet<i64>) {
    match value {
        Value::Object(map) => {
            for (name, child) in map {
                collect_ids(child, name, ids);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_ids(item, key, ids);
            }
        }
        Value::Number(number) if is_unlock_key(key) => {
            if let Some(id) = number.as_i64() {
                ids.insert(id);
            }
        }
        _ => {}
    }
}

fn is_unlock_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    UNLOCK_KEY_MARKERS.iter().any(|marker| lower.contains(marker))
}
