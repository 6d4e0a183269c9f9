//! Persistence configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where and how snapshot files are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persist active snapshots to disk
    pub persist_snapshots: bool,
    /// Directory holding all snapshot files
    pub snapshot_dir: PathBuf,
    /// Baseline table file name
    pub baseline_file_name: String,
    /// Delta table file name
    pub delta_file_name: String,
    /// Progression journal file name
    pub journal_file_name: String,
    /// Append component changes to the journal on finalize
    pub journal_enabled: bool,
    /// Gzip level, 0 to 9
    pub compression_level: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            persist_snapshots: true,
            snapshot_dir: PathBuf::from("sandbox"),
            baseline_file_name: "sandbox_progression_baseline.csv.gz".to_string(),
            delta_file_name: "sandbox_progression_delta.csv.gz".to_string(),
            journal_file_name: "sandbox_progression_journal.jsonl".to_string(),
            journal_enabled: true,
            compression_level: 6,
        }
    }
}

impl StorageConfig {
    /// Default configuration rooted at `dir`
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: dir.into(),
            ..Self::default()
        }
    }

    /// Full baseline file path
    #[must_use]
    pub fn baseline_path(&self) -> PathBuf {
        self.snapshot_dir.join(&self.baseline_file_name)
    }

    /// Full delta file path
    #[must_use]
    pub fn delta_path(&self) -> PathBuf {
        self.snapshot_dir.join(&self.delta_file_name)
    }

    /// Full journal file path
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.snapshot_dir.join(&self.journal_file_name)
    }

    /// Gzip level clamped to the valid range
    #[must_use]
    pub fn compression(&self) -> flate2::Compression {
        flate2::Compression::new(self.compression_level.min(9))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_names() {
        let config = StorageConfig::in_dir("/data");
        assert_eq!(
            config.baseline_path(),
            PathBuf::from("/data/sandbox_progression_baseline.csv.gz")
        );
        assert_eq!(config.delta_path(), PathBuf::from("/data/sandbox_progression_delta.csv.gz"));
        assert_eq!(
            config.journal_path(),
            PathBuf::from("/data/sandbox_progression_journal.jsonl")
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"snapshot_dir":"/srv/snapshots","journal_enabled":false}"#).unwrap();
        assert_eq!(config.snapshot_dir, PathBuf::from("/srv/snapshots"));
        assert!(!config.journal_enabled);
        assert!(config.persist_snapshots);
        assert_eq!(config.compression_level, 6);
    }

    #[test]
    fn test_compression_clamped() {
        let config = StorageConfig {
            compression_level: 42,
            ..StorageConfig::default()
        };
        assert_eq!(config.compression().level(), 9);
    }
}
