//! Zone entity lifecycle diff.

use sandbox_core::{DeltaKind, DeltaRow, EntityEntry};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Compare the entities of a zone before and after a session
///
/// Entries are matched by `entity_index` alone. A reused index whose prefab
/// differs is reported as `entity_prefab_changed` whatever its version.
/// Output is ordered by index.
#[must_use]
pub fn compute_entity_delta(pre: &[EntityEntry], post: &[EntityEntry]) -> Vec<DeltaRow> {
    let pre_map = index_entries(pre);
    let post_map = index_entries(post);

    let indices: BTreeSet<u32> = pre_map.keys().chain(post_map.keys()).copied().collect();

    let mut rows = Vec::new();
    for index in indices {
        match (pre_map.get(&index), post_map.get(&index)) {
            (None, Some(after)) => rows.push(DeltaRow::entity(DeltaKind::EntityCreated, after)),
            (Some(before), None) => rows.push(DeltaRow::entity(DeltaKind::EntityRemoved, before)),
            (Some(before), Some(after)) if before.prefab_id != after.prefab_id => {
                rows.push(DeltaRow::entity(DeltaKind::EntityPrefabChanged, after));
            }
            _ => {}
        }
    }

    rows
}

fn index_entries(entries: &[EntityEntry]) -> BTreeMap<u32, &EntityEntry> {
    let mut map = BTreeMap::new();
    for entry in entries {
        if map.insert(entry.entity_index, entry).is_some() {
            debug!(entity_index = entry.entity_index, "Duplicate entity index, keeping the last");
        }
    }
    map
}
