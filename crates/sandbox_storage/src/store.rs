//! In-memory snapshot store.
//!
//! One slot per player key holds a pending capture, an active
//! baseline/delta pair, or both when a player re-enters before the previous
//! pair was restored. A key with neither is removed from the map.
//!
//! Every operation takes the lock once and does only in-memory work, so no
//! reader can observe a half-updated slot and no I/O ever runs under the
//! lock. The dirty flag is a pair of revision counters: mutations of active
//! state bump `revision`, a completed persistence pass records the revision
//! it wrote as `clean_revision`.

use sandbox_core::{BaselineSnapshot, DeltaSnapshot, PendingContext, PlayerKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// A computed baseline and delta ready for restore
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePair {
    /// State to restore on exit
    pub baseline: BaselineSnapshot,
    /// Changes made during the session
    pub delta: DeltaSnapshot,
}

/// Active pairs copied out for a persistence pass
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveExport {
    /// Store revision the copy reflects
    pub revision: u64,
    /// Baselines ordered by player key
    pub baselines: Vec<BaselineSnapshot>,
    /// Deltas ordered by player key
    pub deltas: Vec<DeltaSnapshot>,
}

impl ActiveExport {
    /// Check if there is nothing to persist
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty() && self.deltas.is_empty()
    }
}

/// Store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Keys with a pending capture
    pub pending: usize,
    /// Keys with an active pair
    pub active: usize,
    /// Current revision
    pub revision: u64,
    /// Whether active state changed since the last clean mark
    pub dirty: bool,
}

#[derive(Debug, Clone)]
enum Slot {
    Pending(PendingContext),
    Active(ActivePair),
    Reentered {
        pending: PendingContext,
        active: ActivePair,
    },
}

impl Slot {
    fn from_parts(pending: Option<PendingContext>, active: Option<ActivePair>) -> Option<Self> {
        match (pending, active) {
            (None, None) => None,
            (Some(pending), None) => Some(Self::Pending(pending)),
            (None, Some(active)) => Some(Self::Active(active)),
            (Some(pending), Some(active)) => Some(Self::Reentered { pending, active }),
        }
    }

    fn into_parts(self) -> (Option<PendingContext>, Option<ActivePair>) {
        match self {
            Self::Pending(pending) => (Some(pending), None),
            Self::Active(active) => (None, Some(active)),
            Self::Reentered { pending, active } => (Some(pending), Some(active)),
        }
    }

    fn pending(&self) -> Option<&PendingContext> {
        match self {
            Self::Pending(pending) | Self::Reentered { pending, .. } => Some(pending),
            Self::Active(_) => None,
        }
    }

    fn active(&self) -> Option<&ActivePair> {
        match self {
            Self::Active(active) | Self::Reentered { active, .. } => Some(active),
            Self::Pending(_) => None,
        }
    }

    fn platform_id(&self) -> u64 {
        match self {
            Self::Pending(pending) | Self::Reentered { pending, .. } => pending.header.platform_id,
            Self::Active(active) => active.baseline.header.platform_id,
        }
    }
}

/// Which part of a slot a key lookup is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    Any,
    Pending,
    Active,
}

impl Lookup {
    fn matches(self, slot: &Slot) -> bool {
        match self {
            Self::Any => true,
            Self::Pending => slot.pending().is_some(),
            Self::Active => slot.active().is_some(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    slots: HashMap<PlayerKey, Slot>,
    revision: u64,
    clean_revision: u64,
}

impl StoreInner {
    /// Replace the slot for `key` with whatever `f` leaves behind
    fn update<T>(
        &mut self,
        key: &PlayerKey,
        f: impl FnOnce(Option<PendingContext>, Option<ActivePair>) -> (Option<PendingContext>, Option<ActivePair>, T),
    ) -> T {
        let (pending, active) = self
            .slots
            .remove(key)
            .map_or((None, None), Slot::into_parts);
        let (pending, active, out) = f(pending, active);
        if let Some(slot) = Slot::from_parts(pending, active) {
            self.slots.insert(key.clone(), slot);
        }
        out
    }

    fn resolve_key(&self, character_name: &str, platform_id: u64, lookup: Lookup) -> Option<PlayerKey> {
        let key = PlayerKey::derive(character_name, platform_id);
        if self.slots.get(&key).is_some_and(|slot| lookup.matches(slot)) {
            return Some(key);
        }

        // Renamed character: match on platform id among slots holding the
        // wanted state, lowest key first
        self.slots
            .iter()
            .filter(|(_, slot)| slot.platform_id() == platform_id && lookup.matches(slot))
            .map(|(key, _)| key)
            .min()
            .cloned()
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn is_dirty(&self) -> bool {
        self.revision != self.clean_revision
    }
}

/// Concurrent map from player key to pending and active snapshot state
#[derive(Debug, Default)]
pub struct SnapshotStore {
    inner: RwLock<StoreInner>,
}

impl SnapshotStore {
    /// Create an empty, clean store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending capture, replacing any previous one for the player
    ///
    /// Returns the canonical key, which is also written into the header.
    pub fn upsert_pending_context(&self, mut context: PendingContext) -> PlayerKey {
        let key = PlayerKey::derive(&context.header.character_name, context.header.platform_id);
        context.header.player_key = key.clone();

        let replaced = self.write().update(&key, |previous, active| {
            let replaced = previous.is_some();
            (Some(context), active, replaced)
        });

        debug!(player_key = %key, replaced, "Pending context stored");
        key
    }

    /// Remove and return the pending capture for a player
    ///
    /// Of several concurrent callers for the same player, exactly one
    /// receives the context.
    pub fn take_pending_context(&self, character_name: &str, platform_id: u64) -> Option<(PlayerKey, PendingContext)> {
        let mut inner = self.write();
        let key = inner.resolve_key(character_name, platform_id, Lookup::Pending)?;
        let pending = inner.update(&key, |pending, active| (None, active, pending))?;
        Some((key, pending))
    }

    /// Put back a pending capture whose finalize could not complete
    ///
    /// A pending capture stored after the take is newer and is kept. Returns
    /// whether `context` was reinstated.
    pub fn reinstate_pending_context(&self, key: &PlayerKey, context: PendingContext) -> bool {
        let reinstated = self.write().update(key, |current, active| match current {
            Some(current) => (Some(current), active, false),
            None => (Some(context), active, true),
        });

        debug!(player_key = %key, reinstated, "Pending context returned");
        reinstated
    }

    /// Install the active pair for a player and mark the store dirty
    ///
    /// An unrestored pair for the same key is replaced and returned.
    pub fn put_active_snapshots(
        &self,
        key: &PlayerKey,
        baseline: BaselineSnapshot,
        delta: DeltaSnapshot,
    ) -> Option<ActivePair> {
        let pair = ActivePair { baseline, delta };
        let superseded = {
            let mut inner = self.write();
            let superseded = inner.update(key, |pending, previous| (pending, Some(pair), previous));
            inner.touch();
            superseded
        };

        if let Some(previous) = &superseded {
            warn!(
                player_key = %key,
                superseded_snapshot_id = %previous.baseline.header.snapshot_id,
                "Replacing active snapshots that were never restored"
            );
        }
        superseded
    }

    /// Look up the active pair for a player
    pub fn get_active_snapshots(
        &self,
        character_name: &str,
        platform_id: u64,
    ) -> Option<(PlayerKey, BaselineSnapshot, DeltaSnapshot)> {
        let inner = self.read();
        let key = inner.resolve_key(character_name, platform_id, Lookup::Active)?;
        let active = inner.slots.get(&key)?.active()?;
        Some((key, active.baseline.clone(), active.delta.clone()))
    }

    /// Drop the active pair for a key after it has been restored
    pub fn remove_active_snapshots(&self, key: &PlayerKey) -> Option<ActivePair> {
        let mut inner = self.write();
        let removed = inner.update(key, |pending, active| (pending, None, active));
        if removed.is_some() {
            inner.touch();
        }
        removed
    }

    /// Replace all state with previously persisted active pairs
    ///
    /// Deltas are paired with baselines by player key. A baseline without a
    /// delta gets an empty one; a delta without a baseline cannot be restored
    /// and is dropped. Pending captures are discarded. Returns the number of
    /// pairs installed.
    pub fn import_active_snapshots(
        &self,
        baselines: Vec<BaselineSnapshot>,
        deltas: Vec<DeltaSnapshot>,
        mark_dirty: bool,
    ) -> usize {
        let mut deltas: HashMap<PlayerKey, DeltaSnapshot> = deltas
            .into_iter()
            .filter(|delta| !delta.header.player_key.is_empty())
            .map(|delta| (delta.header.player_key.clone(), delta))
            .collect();

        let mut slots = HashMap::new();
        for baseline in baselines {
            let key = baseline.header.player_key.clone();
            if key.is_empty() {
                continue;
            }
            let delta = deltas
                .remove(&key)
                .unwrap_or_else(|| DeltaSnapshot::new(baseline.header.clone(), Vec::new()));
            slots.insert(key, Slot::Active(ActivePair { baseline, delta }));
        }

        for key in deltas.keys() {
            warn!(player_key = %key, "Dropping persisted delta without a baseline");
        }

        let imported = slots.len();
        let mut inner = self.write();
        inner.slots = slots;
        inner.touch();
        if !mark_dirty {
            inner.clean_revision = inner.revision;
        }
        imported
    }

    /// All active baselines, ordered by player key
    #[must_use]
    pub fn active_baselines(&self) -> Vec<BaselineSnapshot> {
        self.export_active().baselines
    }

    /// All active deltas, ordered by player key
    #[must_use]
    pub fn active_deltas(&self) -> Vec<DeltaSnapshot> {
        self.export_active().deltas
    }

    /// Copy every active pair together with the current revision
    #[must_use]
    pub fn export_active(&self) -> ActiveExport {
        let inner = self.read();
        let mut pairs: Vec<_> = inner
            .slots
            .iter()
            .filter_map(|(key, slot)| slot.active().map(|active| (key, active)))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));

        ActiveExport {
            revision: inner.revision,
            baselines: pairs.iter().map(|(_, pair)| pair.baseline.clone()).collect(),
            deltas: pairs.iter().map(|(_, pair)| pair.delta.clone()).collect(),
        }
    }

    /// Canonical key the store would use for a player, if it holds anything
    #[must_use]
    pub fn resolve_key(&self, character_name: &str, platform_id: u64) -> Option<PlayerKey> {
        self.read().resolve_key(character_name, platform_id, Lookup::Any)
    }

    /// Flag that active state changed
    pub fn mark_dirty(&self) {
        self.write().touch();
    }

    /// Flag that all current state has been persisted
    pub fn mark_clean(&self) {
        let mut inner = self.write();
        inner.clean_revision = inner.revision;
    }

    /// Mark clean only if nothing changed since `revision` was exported
    ///
    /// Returns whether the store is now clean.
    pub fn mark_clean_at(&self, revision: u64) -> bool {
        let mut inner = self.write();
        if inner.revision == revision {
            inner.clean_revision = revision;
            true
        } else {
            false
        }
    }

    /// Check if active state changed since the last clean mark
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.read().is_dirty()
    }

    /// Drop every slot and reset the dirty flag
    pub fn clear_all(&self) {
        let mut inner = self.write();
        inner.slots.clear();
        inner.clean_revision = inner.revision;
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let inner = self.read();
        StoreStats {
            pending: inner.slots.values().filter(|slot| slot.pending().is_some()).count(),
            active: inner.slots.values().filter(|slot| slot.active().is_some()).count(),
            revision: inner.revision,
            dirty: inner.is_dirty(),
        }
    }
}
