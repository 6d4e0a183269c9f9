//! Sandbox snapshot CLI
//!
//! Offline tooling over persisted baseline and delta tables.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use sandbox_core::{BaselineRow, BaselineSnapshot, DeltaRow, PlayerKey, group_baseline_rows, group_delta_rows};
use sandbox_delta::{DeltaEngine, DeltaInput};
use sandbox_storage::{StorageConfig, read_baseline, read_delta, write_delta};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sandboxctl")]
#[command(about = "Inspect, verify and diff sandbox progression snapshots", long_about = None)]
struct Cli {
    /// JSON storage config used to locate default files
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count rows per player and component
    Inspect {
        /// Table to read; defaults to the configured file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Read a delta table instead of a baseline table
        #[arg(long)]
        delta: bool,
    },
    /// Re-hash every payload of a baseline table
    Verify {
        /// Baseline table; defaults to the configured file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Compute the delta between two baseline tables
    Diff {
        /// Baseline captured on entry
        #[arg(long)]
        pre: PathBuf,
        /// Baseline captured on finalize
        #[arg(long)]
        post: PathBuf,
        /// Delta table to write; defaults to the configured file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Component scanned for opened tech; repeatable
        #[arg(long = "unlock-component")]
        unlock_components: Vec<String>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect { file, delta } => {
            let report = if delta {
                let path = file.unwrap_or_else(|| config.delta_path());
                let rows = read_delta(&path).wrap_err_with(|| format!("reading {}", path.display()))?;
                delta_report(rows)
            } else {
                let path = file.unwrap_or_else(|| config.baseline_path());
                let rows = read_baseline(&path).wrap_err_with(|| format!("reading {}", path.display()))?;
                baseline_report(rows)
            };
            print!("{}", report.render());
            Ok(())
        }
        Commands::Verify { file } => {
            let path = file.unwrap_or_else(|| config.baseline_path());
            let rows = read_baseline(&path).wrap_err_with(|| format!("reading {}", path.display()))?;
            let mismatches = hash_mismatches(&rows);
            for row in &mismatches {
                println!(
                    "MISMATCH {} {} {}",
                    row.context.player_key, row.context.snapshot_id, row.qualified_type
                );
            }
            if mismatches.is_empty() {
                println!("{} rows verified", rows.len());
                Ok(())
            } else {
                Err(eyre!("{} of {} rows failed hash verification", mismatches.len(), rows.len()))
            }
        }
        Commands::Diff {
            pre,
            post,
            output,
            unlock_components,
        } => {
            let output = output.unwrap_or_else(|| config.delta_path());
            let pre_rows = read_baseline(&pre).wrap_err_with(|| format!("reading {}", pre.display()))?;
            let post_rows = read_baseline(&post).wrap_err_with(|| format!("reading {}", post.display()))?;

            let engine = DeltaEngine::with_unlock_components(unlock_components);
            let rows = diff_baselines(pre_rows, post_rows, &engine);
            write_delta(&output, &rows).wrap_err_with(|| format!("writing {}", output.display()))?;

            info!(output = %output.display(), "Delta written");
            println!("{}", DeltaEngine::summarize(&rows));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<StorageConfig> {
    let Some(path) = path else {
        return Ok(StorageConfig::default());
    };
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("parsing config {}", path.display()))
}

/// Row counts of one table
#[derive(Debug, Default, PartialEq, Eq)]
struct TableReport {
    rows: usize,
    players: usize,
    counts: BTreeMap<String, usize>,
}

impl TableReport {
    fn render(&self) -> String {
        let mut out = format!("{} rows, {} players\n", self.rows, self.players);
        for (name, count) in &self.counts {
            out.push_str(&format!("  {name}: {count}\n"));
        }
        out
    }
}

fn baseline_report(rows: Vec<BaselineRow>) -> TableReport {
    let mut counts = BTreeMap::new();
    for row in &rows {
        let state = if row.existed { "" } else { " (absent)" };
        *counts
            .entry(format!("{}/{}{state}", row.row_type, row.component_type))
            .or_insert(0) += 1;
    }
    TableReport {
        rows: rows.len(),
        players: group_baseline_rows(rows).len(),
        counts,
    }
}

fn delta_report(rows: Vec<DeltaRow>) -> TableReport {
    let summary = DeltaEngine::summarize(&rows);
    TableReport {
        rows: summary.total,
        players: group_delta_rows(rows).len(),
        counts: summary.by_kind,
    }
}

fn hash_mismatches(rows: &[BaselineRow]) -> Vec<&BaselineRow> {
    rows.iter().filter(|row| !row.hash_matches()).collect()
}

/// Delta rows for every player present in both tables
///
/// Entity state is not persisted in baseline tables, so only component and
/// detector rows are produced. The delta keeps the entry capture's snapshot
/// id and takes the finalize capture's time.
fn diff_baselines(pre: Vec<BaselineRow>, post: Vec<BaselineRow>, engine: &DeltaEngine) -> Vec<DeltaRow> {
    let post_by_key: BTreeMap<PlayerKey, BaselineSnapshot> = group_baseline_rows(post)
        .into_iter()
        .map(|snapshot| (snapshot.header.player_key.clone(), snapshot))
        .collect();

    let mut rows = Vec::new();
    for pre in group_baseline_rows(pre) {
        let Some(post) = post_by_key.get(&pre.header.player_key) else {
            warn!(player_key = %pre.header.player_key, "No finalize capture for player, skipping");
            continue;
        };

        let mut header = pre.header.clone();
        header.captured_at = post.header.captured_at;
        let input = DeltaInput {
            context: header.row_context(),
            pre_components: &pre.rows,
            post_components: &post.rows,
            pre_entities: &[],
            post_entities: &[],
        };
        rows.extend(engine.compute(&input));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use sandbox_core::{DeltaKind, PlayerIdentity, SnapshotHeader};
    use sandbox_storage::write_baseline;

    fn capture(name: &str, minute: u32, components: &[(&str, &str)]) -> Vec<BaselineRow> {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap();
        let header = SnapshotHeader::new(&PlayerIdentity::new(name, 42), "arena", at);
        components
            .iter()
            .map(|(qt, payload)| BaselineRow::component(header.row_context(), qt, true, payload.as_bytes()))
            .collect()
    }

    #[test]
    fn test_diff_reports_changes_and_opened_tech() {
        let pre = capture("Alice", 0, &[("Game.Research", r#"{"tech":[1]}"#), ("Game.Health", "10")]);
        let post = capture("Alice", 5, &[("Game.Research", r#"{"tech":[1,7]}"#), ("Game.Health", "10")]);
        let engine = DeltaEngine::with_unlock_components(["Research"]);

        let rows = diff_baselines(pre.clone(), post, &engine);
        let summary = DeltaEngine::summarize(&rows);
        assert_eq!(summary.count("component_changed"), 1);
        assert_eq!(summary.count("tech_opened"), 1);
        assert!(
            rows.iter()
                .all(|row| row.context.snapshot_id == pre[0].context.snapshot_id)
        );
        assert!(
            rows.iter()
                .all(|row| row.context.captured_at == pre[0].context.captured_at + Duration::minutes(5))
        );
        assert!(rows.iter().any(|row| row.kind == DeltaKind::TechOpened && row.tech_id() == Some(7)));
    }

    #[test]
    fn test_diff_skips_players_without_post_capture() {
        let pre = capture("Alice", 0, &[("Game.Health", "10")]);
        let post = capture("Bob", 5, &[("Game.Health", "3")]);
        assert!(diff_baselines(pre, post, &DeltaEngine::new()).is_empty());
    }

    #[test]
    fn test_hash_mismatch_detected() {
        let mut rows = capture("Alice", 0, &[("Game.Health", "10"), ("Game.Mana", "5")]);
        assert!(hash_mismatches(&rows).is_empty());

        rows[1].payload_base64 = sandbox_core::encode_payload(b"6");
        let bad = hash_mismatches(&rows);
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].qualified_type, "Game.Mana");
    }

    #[test]
    fn test_baseline_report_counts() {
        let mut rows = capture("Alice", 0, &[("Game.Health", "10"), ("Game.Mana", "5")]);
        rows.extend(capture("Bob", 1, &[("Game.Health", "7")]));
        let report = baseline_report(rows);

        assert_eq!(report.rows, 3);
        assert_eq!(report.players, 2);
        assert_eq!(report.counts.get("component/Health"), Some(&2));
        assert!(report.render().starts_with("3 rows, 2 players\n"));
    }

    #[test]
    fn test_diff_output_round_trips_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let pre_path = dir.path().join("pre.csv.gz");
        let post_path = dir.path().join("post.csv.gz");
        write_baseline(&pre_path, &capture("Alice", 0, &[("Game.Health", "10")])).unwrap();
        write_baseline(&post_path, &capture("Alice", 2, &[("Game.Health", "4")])).unwrap();

        let rows = diff_baselines(
            read_baseline(&pre_path).unwrap(),
            read_baseline(&post_path).unwrap(),
            &DeltaEngine::new(),
        );
        let out = dir.path().join("delta.csv.gz");
        write_delta(&out, &rows).unwrap();

        let report = delta_report(read_delta(&out).unwrap());
        assert_eq!(report.rows, 1);
        assert_eq!(report.players, 1);
        assert_eq!(report.counts.get("component_changed"), Some(&1));
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), StorageConfig::default());
    }

    #[test]
    fn test_config_read_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, r#"{"snapshot_dir":"/data/sandbox"}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.baseline_path(), PathBuf::from("/data/sandbox/sandbox_progression_baseline.csv.gz"));
    }
}
