//! Structural diff of component rows.

use sandbox_core::{BaselineRow, DeltaKind, DeltaRow};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

type ComponentKey<'a> = (&'a str, &'a str);

/// Compare two component captures
///
/// Rows are matched by `(component_type, qualified_type)`. A row with
/// `existed = false` counts as absent. Unchanged components produce no row.
/// Output is ordered by component type, then qualified type.
#[must_use]
pub fn compute_component_delta(pre: &[BaselineRow], post: &[BaselineRow]) -> Vec<DeltaRow> {
    let pre_map = index_rows(pre);
    let post_map = index_rows(post);

    let keys: BTreeSet<ComponentKey<'_>> = pre_map.keys().chain(post_map.keys()).copied().collect();

    let mut rows = Vec::new();
    for key in keys {
        let before = pre_map.get(&key).copied().filter(|row| row.existed);
        let after = post_map.get(&key).copied().filter(|row| row.existed);

        let row = match (before, after) {
            (None, None) => continue,
            (None, Some(after)) => {
                DeltaRow::component(DeltaKind::ComponentAdded, key.0, "", &after.payload_base64)
            }
            (Some(before), None) => {
                DeltaRow::component(DeltaKind::ComponentRemoved, key.0, &before.payload_base64, "")
            }
            (Some(before), Some(after)) => {
                if same_payload(before, after) {
                    continue;
                }
                DeltaRow::component(
                    DeltaKind::ComponentChanged,
                    key.0,
                    &before.payload_base64,
                    &after.payload_base64,
                )
            }
        };
        rows.push(row);
    }

    rows
}

fn index_rows(rows: &[BaselineRow]) -> BTreeMap<ComponentKey<'_>, &BaselineRow> {
    let mut map = BTreeMap::new();
    for row in rows {
        let key = (row.component_type.as_str(), row.qualified_type.as_str());
        if map.insert(key, row).is_some() {
            debug!(
                component_type = key.0,
                qualified_type = key.1,
                "Duplicate component row, keeping the last"
            );
        }
    }
    map
}

/// Hash equality, falling back to the encoded payload for rows without a hash
fn same_payload(before: &BaselineRow, after: &BaselineRow) -> bool {
    if before.payload_hash.is_empty() || after.payload_hash.is_empty() {
        before.payload_base64 == after.payload_base64
    } else {
        before.payload_hash.eq_ignore_ascii_case(&after.payload_hash)
    }
}
