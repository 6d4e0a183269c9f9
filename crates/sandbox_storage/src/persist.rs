//! Moves active snapshots between the store and disk.

use crate::codec::{read_table, stage_table};
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};
use crate::store::SnapshotStore;
use sandbox_core::{BaselineRow, DeltaRow, group_baseline_rows, group_delta_rows};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Result of one flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Persistence is disabled
    Disabled,
    /// Nothing changed since the last flush
    Clean,
    /// Files written
    Written {
        /// Baseline rows written
        baseline_rows: usize,
        /// Delta rows written
        delta_rows: usize,
        /// Whether the store changed while writing and stays dirty
        stale: bool,
    },
    /// No active pairs remain; the files were removed
    Removed,
}

/// Result of loading persisted files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Persistence is disabled
    Disabled,
    /// No files on disk
    Missing,
    /// Active pairs installed
    Loaded {
        /// Players restored into the store
        players: usize,
    },
}

/// Writes the store's active pairs to the baseline and delta tables
#[derive(Debug, Clone)]
pub struct SnapshotPersister {
    config: StorageConfig,
}

impl SnapshotPersister {
    /// Create a new persister
    #[must_use]
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    /// Get config
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Persist active pairs if the store is dirty
    ///
    /// The store is marked clean only if it did not change while the files
    /// were being written. Both tables are encoded and synced to temporary
    /// files before either target is replaced, so an encoding or write
    /// failure leaves the previous pair on disk. Only a failed rename of the
    /// delta after the baseline was renamed leaves a mismatched pair; the
    /// store stays dirty and the next flush rewrites both.
    ///
    /// # Errors
    ///
    /// Returns error if any file cannot be written or removed; the store
    /// stays dirty
    pub fn flush(&self, store: &SnapshotStore) -> StorageResult<FlushOutcome> {
        if !self.config.persist_snapshots {
            return Ok(FlushOutcome::Disabled);
        }
        if !store.is_dirty() {
            return Ok(FlushOutcome::Clean);
        }

        let export = store.export_active();
        let baseline_path = self.config.baseline_path();
        let delta_path = self.config.delta_path();

        if export.is_empty() {
            remove_if_exists(&baseline_path)?;
            remove_if_exists(&delta_path)?;
            store.mark_clean_at(export.revision);
            debug!(dir = %self.config.snapshot_dir.display(), "Removed snapshot files");
            return Ok(FlushOutcome::Removed);
        }

        let baseline_rows: Vec<BaselineRow> = export
            .baselines
            .into_iter()
            .flat_map(|snapshot| snapshot.rows)
            .collect();
        let delta_rows: Vec<DeltaRow> = export
            .deltas
            .into_iter()
            .flat_map(|snapshot| snapshot.rows)
            .collect();

        // Both tables are fully written before either replaces its target
        let level = self.config.compression();
        let baseline = stage_table(&baseline_path, &baseline_rows, level)?;
        let delta = stage_table(&delta_path, &delta_rows, level)?;
        baseline.commit()?;
        delta.commit()?;

        let stale = !store.mark_clean_at(export.revision);
        info!(
            baseline_rows = baseline_rows.len(),
            delta_rows = delta_rows.len(),
            stale,
            "Snapshots persisted"
        );
        Ok(FlushOutcome::Written {
            baseline_rows: baseline_rows.len(),
            delta_rows: delta_rows.len(),
            stale,
        })
    }

    /// Replace the store's state with the persisted files
    ///
    /// A missing delta file loads as no deltas. The store is left clean.
    ///
    /// # Errors
    ///
    /// Returns error if a present file cannot be read or is malformed
    pub fn load(&self, store: &SnapshotStore) -> StorageResult<LoadOutcome> {
        if !self.config.persist_snapshots {
            return Ok(LoadOutcome::Disabled);
        }

        let baseline_path = self.config.baseline_path();
        let delta_path = self.config.delta_path();
        if !baseline_path.exists() {
            return Ok(LoadOutcome::Missing);
        }

        let baseline_rows: Vec<BaselineRow> = read_table(&baseline_path)?;
        let delta_rows: Vec<DeltaRow> = if delta_path.exists() {
            read_table(&delta_path)?
        } else {
            Vec::new()
        };

        let players = store.import_active_snapshots(
            group_baseline_rows(baseline_rows),
            group_delta_rows(delta_rows),
            false,
        );
        info!(players, "Snapshots loaded");
        Ok(LoadOutcome::Loaded { players })
    }
}

fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}
