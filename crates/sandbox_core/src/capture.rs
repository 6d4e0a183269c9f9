//! Seams to the live simulation.
//!
//! The engine never reads or mutates game state itself. A host supplies a
//! [`CaptureSource`] for reading and a [`RestoreApplier`] for rolling back.

use crate::error::CoreResult;
use crate::id::PlayerIdentity;
use crate::record::{ComponentState, DeltaRow, EntityEntry};
use crate::snapshot::BaselineSnapshot;
use std::sync::Arc;

/// Reads live state for a capture
pub trait CaptureSource: Send + Sync {
    /// Read every tracked component of the player's character
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Capture`] if the character cannot be read
    fn capture_components(&self, identity: &PlayerIdentity, zone_id: &str) -> CoreResult<Vec<ComponentState>>;

    /// Read the entities currently inside a zone
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Capture`] if the zone cannot be read
    fn capture_entities(&self, zone_id: &str) -> CoreResult<Vec<EntityEntry>>;
}

impl<T: CaptureSource + ?Sized> CaptureSource for Arc<T> {
    fn capture_components(&self, identity: &PlayerIdentity, zone_id: &str) -> CoreResult<Vec<ComponentState>> {
        (**self).capture_components(identity, zone_id)
    }

    fn capture_entities(&self, zone_id: &str) -> CoreResult<Vec<EntityEntry>> {
        (**self).capture_entities(zone_id)
    }
}

/// Writes a baseline back into live state
pub trait RestoreApplier {
    /// Restore every component row of the baseline onto the character
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Restore`] if a component cannot be written
    fn restore_components(&mut self, identity: &PlayerIdentity, baseline: &BaselineSnapshot) -> CoreResult<()>;

    /// Destroy entities created during the session
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::Restore`] if cleanup fails
    fn apply_entity_cleanup(&mut self, zone_id: &str, entity_rows: &[DeltaRow]) -> CoreResult<()>;

    /// Whether an entity is still alive after restore
    ///
    /// Used to report created entities that cleanup missed. Appliers that
    /// cannot query live entities report none.
    fn entity_exists(&self, _entity_index: u32, _entity_version: u32) -> bool {
        false
    }
}
