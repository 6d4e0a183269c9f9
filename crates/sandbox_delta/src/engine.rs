//! Full delta computation for one capture pair.

use crate::component::compute_component_delta;
use crate::detector::{DerivedDetector, OpenedTechDetector};
use crate::entity::compute_entity_delta;
use sandbox_core::{BaselineRow, DeltaRow, EntityEntry, RowContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// The two captures of one session
#[derive(Debug, Clone)]
pub struct DeltaInput<'a> {
    /// Context stamped into every output row
    pub context: RowContext,
    /// Components captured on entry
    pub pre_components: &'a [BaselineRow],
    /// Components captured on finalize
    pub post_components: &'a [BaselineRow],
    /// Zone entities captured on entry
    pub pre_entities: &'a [EntityEntry],
    /// Zone entities captured on finalize
    pub post_entities: &'a [EntityEntry],
}

/// Row counts per kind
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeltaSummary {
    /// Total rows
    pub total: usize,
    /// Rows per wire kind name
    pub by_kind: BTreeMap<String, usize>,
}

impl DeltaSummary {
    /// Number of rows of one kind
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.by_kind.get(kind).copied().unwrap_or(0)
    }

    /// Check if nothing changed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl fmt::Display for DeltaSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rows", self.total)?;
        for (kind, count) in &self.by_kind {
            write!(f, ", {kind}={count}")?;
        }
        Ok(())
    }
}

/// Structural diff plus registered derived detectors
pub struct DeltaEngine {
    detectors: Vec<Box<dyn DerivedDetector>>,
}

impl DeltaEngine {
    /// Engine without derived detectors
    #[must_use]
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Engine with the opened-tech detector over the given components
    ///
    /// An empty list scans every component.
    #[must_use]
    pub fn with_unlock_components<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().with_detector(OpenedTechDetector::new().with_unlock_components(components))
    }

    /// Register a detector
    #[must_use]
    pub fn with_detector(mut self, detector: impl DerivedDetector + 'static) -> Self {
        self.register(Box::new(detector));
        self
    }

    /// Register a boxed detector; detectors run in registration order
    pub fn register(&mut self, detector: Box<dyn DerivedDetector>) {
        self.detectors.push(detector);
    }

    /// Registered detector names
    #[must_use]
    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Compute every delta row for one session
    ///
    /// Output is the component delta, then the entity delta, then each
    /// detector's rows in registration order. Detector rows whose kind and
    /// shape disagree are dropped.
    #[must_use]
    pub fn compute(&self, input: &DeltaInput<'_>) -> Vec<DeltaRow> {
        let mut rows = compute_component_delta(input.pre_components, input.post_components);
        rows.extend(compute_entity_delta(input.pre_entities, input.post_entities));

        for detector in &self.detectors {
            let found = detector.detect(input.pre_components, input.post_components);
            for row in found {
                match row.validate() {
                    Ok(()) => rows.push(row),
                    Err(e) => warn!(detector = detector.name(), error = %e, "Dropping malformed detector row"),
                }
            }
        }

        debug!(
            snapshot_id = %input.context.snapshot_id,
            rows = rows.len(),
            "Delta computed"
        );

        rows.into_iter()
            .map(|row| row.with_context(input.context.clone()))
            .collect()
    }

    /// Count rows per kind
    #[must_use]
    pub fn summarize(rows: &[DeltaRow]) -> DeltaSummary {
        let mut summary = DeltaSummary {
            total: rows.len(),
            by_kind: BTreeMap::new(),
        };
        for row in rows {
            *summary.by_kind.entry(row.kind.as_str().to_string()).or_insert(0) += 1;
        }
        summary
    }
}

impl Default for DeltaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeltaEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaEngine")
            .field("detectors", &self.detector_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_core::{DeltaKind, DeltaPayload, PlayerKey, SnapshotId};

    struct MislabelledDetector;

    impl DerivedDetector for MislabelledDetector {
        fn name(&self) -> &str {
            "mislabelled"
        }

        fn detect(&self, _pre: &[BaselineRow], _post: &[BaselineRow]) -> Vec<DeltaRow> {
            vec![
                DeltaRow::new(
                    DeltaKind::TechOpened,
                    DeltaPayload::Component {
                        component_type: "X".to_string(),
                        before_payload_base64: String::new(),
                        after_payload_base64: String::new(),
                    },
                ),
                DeltaRow::tech_opened(1, "GUID:1").with_operation("custom"),
            ]
        }
    }

    fn context() -> RowContext {
        RowContext {
            snapshot_id: SnapshotId::from_raw("snap-1"),
            player_key: PlayerKey::derive("Alice", 1),
            character_name: "Alice".to_string(),
            platform_id: 1,
            zone_id: "zone".to_string(),
            ..RowContext::default()
        }
    }

    fn row(qualified_type: &str, json: &str) -> BaselineRow {
        BaselineRow::component(RowContext::default(), qualified_type, true, json.as_bytes())
    }

    #[test]
    fn test_compute_concatenates_in_order() {
        let pre = vec![row("Game.Research", r#"{"tech":[1]}"#)];
        let post = vec![row("Game.Research", r#"{"tech":[1,2]}"#)];
        let post_entities = vec![EntityEntry::new(3, 1, 30, "Forge")];
        let input = DeltaInput {
            context: context(),
            pre_components: &pre,
            post_components: &post,
            pre_entities: &[],
            post_entities: &post_entities,
        };

        let engine = DeltaEngine::with_unlock_components(Vec::<String>::new());
        let rows = engine.compute(&input);
        let kinds: Vec<_> = rows.iter().map(|row| row.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![DeltaKind::ComponentChanged, DeltaKind::EntityCreated, DeltaKind::TechOpened]
        );
        assert!(rows.iter().all(|row| row.context == context()));
    }

    #[test]
    fn test_detectors_do_not_suppress_structural_rows() {
        let pre = vec![row("Game.Research", r#"{"tech":[1]}"#)];
        let post = vec![row("Game.Research", r#"{"tech":[1,2]}"#)];
        let input = DeltaInput {
            context: context(),
            pre_components: &pre,
            post_components: &post,
            pre_entities: &[],
            post_entities: &[],
        };

        let without = DeltaEngine::new().compute(&input);
        let with = DeltaEngine::with_unlock_components(["Research"]).compute(&input);
        assert_eq!(without.len(), 1);
        assert_eq!(with.len(), 2);
        assert_eq!(with[0], without[0]);
    }

    #[test]
    fn test_malformed_detector_rows_dropped() {
        let input = DeltaInput {
            context: context(),
            pre_components: &[],
            post_components: &[],
            pre_entities: &[],
            post_entities: &[],
        };
        let rows = DeltaEngine::new().with_detector(MislabelledDetector).compute(&input);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].operation, "custom");
    }

    #[test]
    fn test_summarize() {
        let rows = vec![
            DeltaRow::tech_opened(1, "GUID:1"),
            DeltaRow::tech_opened(2, "GUID:2"),
            DeltaRow::entity(DeltaKind::EntityRemoved, &EntityEntry::new(1, 1, 1, "")),
        ];
        let summary = DeltaEngine::summarize(&rows);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.count("tech_opened"), 2);
        assert_eq!(summary.count("entity_removed"), 1);
        assert_eq!(summary.count("component_added"), 0);
        assert_eq!(summary.to_string(), "3 rows, entity_removed=1, tech_opened=2");
        assert!(DeltaEngine::summarize(&[]).is_empty());
    }

    #[test]
    fn test_detector_names() {
        let engine = DeltaEngine::with_unlock_components(["UnlockedTech"]);
        assert_eq!(engine.detector_names(), vec!["opened_tech"]);
    }
}
