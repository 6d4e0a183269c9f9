//! Sandbox session lifecycle.
//!
//! `enter` captures a baseline when a player walks into a sandbox zone,
//! `finalize` captures again and stores the computed delta, and `exit`
//! rolls the player back to the baseline. The host decides when each step
//! runs; the session only sequences capture, diff and store calls.

use crate::config::SessionConfig;
use crate::error::{RuntimeError, RuntimeResult};
use chrono::Utc;
use sandbox_core::{
    BaselineSnapshot, CaptureSource, ComponentState, DeltaKind, DeltaSnapshot, EntityEntry, PendingContext,
    PlayerIdentity, PlayerKey, RestoreApplier, SnapshotHeader,
};
use sandbox_delta::{DeltaEngine, DeltaInput, DeltaSummary};
use sandbox_storage::{ProgressionJournal, SnapshotStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of finalizing a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// Key the active pair was stored under
    pub key: PlayerKey,
    /// Row counts of the computed delta
    pub summary: DeltaSummary,
    /// No pending capture existed, so the baseline was taken just now
    pub fallback_baseline: bool,
}

/// Result of exiting a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The player has no active snapshots
    NothingToRestore,
    /// Baseline restored and the active pair dropped
    Restored {
        /// Key that was restored
        key: PlayerKey,
        /// Component rows handed to the applier
        components: usize,
        /// Entity rows handed to cleanup
        entity_rows: usize,
        /// Indices of created entities still alive after restore
        unresolved_entities: Vec<u32>,
    },
}

/// Drives capture, diff and store for sandbox zones
pub struct SandboxSession<C> {
    config: SessionConfig,
    source: C,
    store: Arc<SnapshotStore>,
    engine: DeltaEngine,
    journal: Option<ProgressionJournal>,
}

impl<C: CaptureSource> SandboxSession<C> {
    /// Create a session with the opened-tech detector configured from `config`
    #[must_use]
    pub fn new(source: C, store: Arc<SnapshotStore>, config: SessionConfig) -> Self {
        let engine = DeltaEngine::with_unlock_components(config.unlock_components.iter().cloned());
        Self {
            config,
            source,
            store,
            engine,
            journal: None,
        }
    }

    /// Replace the delta engine
    #[must_use]
    pub fn with_engine(mut self, engine: DeltaEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Append component changes to a journal on finalize
    #[must_use]
    pub fn with_journal(mut self, journal: ProgressionJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Get store
    #[must_use]
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Get config
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Capture the baseline for a player entering `zone_id`
    ///
    /// # Errors
    ///
    /// Returns error if sessions are disabled or the capture fails
    pub fn enter(&self, identity: &PlayerIdentity, zone_id: &str) -> RuntimeResult<PlayerKey> {
        self.ensure_enabled()?;

        let header = SnapshotHeader::new(identity, zone_id, Utc::now());
        let states = self.source.capture_components(identity, zone_id)?;
        let entities = self.source.capture_entities(zone_id)?;
        let rows = BaselineSnapshot::from_states(header.clone(), &states).rows;

        let component_rows = rows.len();
        let entity_count = entities.len();
        let key = self
            .store
            .upsert_pending_context(PendingContext::new(header, rows, entities));

        debug!(player_key = %key, zone_id, component_rows, entities = entity_count, "Baseline captured");
        Ok(key)
    }

    /// Capture the post state, compute the delta and store the active pair
    ///
    /// Without a pending capture, the current state becomes the baseline
    /// with an empty zone and no entities. If the post capture fails, the
    /// pending capture is put back so a retry still diffs against it.
    ///
    /// # Errors
    ///
    /// Returns error if sessions are disabled or a capture fails
    pub fn finalize(&self, identity: &PlayerIdentity) -> RuntimeResult<FinalizeOutcome> {
        self.ensure_enabled()?;

        let now = Utc::now();
        let (key, pending, fallback_baseline) =
            match self.store.take_pending_context(&identity.character_name, identity.platform_id) {
                Some((key, pending)) => (key, pending, false),
                None => {
                    warn!(
                        player_key = %identity.key(),
                        "No pending capture, using current state as baseline"
                    );
                    let header = SnapshotHeader::new(identity, "", now);
                    let states = self.source.capture_components(identity, "")?;
                    let rows = BaselineSnapshot::from_states(header.clone(), &states).rows;
                    (identity.key(), PendingContext::new(header, rows, Vec::new()), true)
                }
            };

        let (post_states, post_entities) = match self.capture_post(identity, &pending.header.zone_id) {
            Ok(post) => post,
            Err(e) => {
                // The entry baseline must survive until an active pair replaces it
                if !fallback_baseline {
                    let reinstated = self.store.reinstate_pending_context(&key, pending);
                    warn!(player_key = %key, reinstated, error = %e, "Post capture failed, pending capture kept");
                }
                return Err(e);
            }
        };

        let mut delta_header = pending.header.clone();
        delta_header.player_key = key.clone();
        delta_header.captured_at = now;
        let post_rows = BaselineSnapshot::from_states(delta_header.clone(), &post_states).rows;

        let rows = self.engine.compute(&DeltaInput {
            context: delta_header.row_context(),
            pre_components: &pending.component_rows,
            post_components: &post_rows,
            pre_entities: &pending.entities,
            post_entities: &post_entities,
        });
        let summary = DeltaEngine::summarize(&rows);

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&key, &pending, &post_rows, now) {
                warn!(player_key = %key, error = %e, "Progression journal append failed");
            }
        }

        let mut baseline = pending.baseline();
        baseline.header.player_key = key.clone();
        self.store
            .put_active_snapshots(&key, baseline, DeltaSnapshot::new(delta_header, rows));

        info!(player_key = %key, %summary, fallback_baseline, "Sandbox delta stored");
        Ok(FinalizeOutcome {
            key,
            summary,
            fallback_baseline,
        })
    }

    /// Roll a player back to their baseline
    ///
    /// Entities created during the session are cleaned up before components
    /// are restored. The active pair is dropped only after both succeed.
    ///
    /// # Errors
    ///
    /// Returns error if sessions are disabled or the applier fails
    pub fn exit<A: RestoreApplier>(&self, identity: &PlayerIdentity, applier: &mut A) -> RuntimeResult<ExitOutcome> {
        self.ensure_enabled()?;

        let Some((key, baseline, delta)) = self
            .store
            .get_active_snapshots(&identity.character_name, identity.platform_id)
        else {
            debug!(player_key = %identity.key(), "Nothing to restore");
            return Ok(ExitOutcome::NothingToRestore);
        };

        let entity_rows = delta.entity_rows();
        applier.apply_entity_cleanup(&delta.header.zone_id, &entity_rows)?;
        applier.restore_components(identity, &baseline)?;

        let unresolved_entities: Vec<u32> = entity_rows
            .iter()
            .filter(|row| row.kind == DeltaKind::EntityCreated)
            .filter_map(|row| Some((row.entity_index()?, row.entity_version()?)))
            .filter(|&(index, version)| applier.entity_exists(index, version))
            .map(|(index, _)| index)
            .collect();
        if !unresolved_entities.is_empty() {
            warn!(
                player_key = %key,
                zone_id = %delta.header.zone_id,
                unresolved = unresolved_entities.len(),
                "Created entities still exist after restore"
            );
        }
        self.store.remove_active_snapshots(&key);

        info!(player_key = %key, components = baseline.len(), entity_rows = entity_rows.len(), "Baseline restored");
        Ok(ExitOutcome::Restored {
            key,
            components: baseline.len(),
            entity_rows: entity_rows.len(),
            unresolved_entities,
        })
    }

    fn capture_post(
        &self,
        identity: &PlayerIdentity,
        zone_id: &str,
    ) -> RuntimeResult<(Vec<ComponentState>, Vec<EntityEntry>)> {
        let states = self.source.capture_components(identity, zone_id)?;
        let entities = if zone_id.is_empty() {
            Vec::new()
        } else {
            self.source.capture_entities(zone_id)?
        };
        Ok((states, entities))
    }

    fn ensure_enabled(&self) -> RuntimeResult<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(RuntimeError::Disabled)
        }
    }
}
