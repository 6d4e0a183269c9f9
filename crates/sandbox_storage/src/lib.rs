//! Sandbox snapshot storage
//!
//! Gzip-compressed columnar tables for baseline and delta rows, the
//! concurrent in-memory snapshot store, the persister that moves active
//! snapshots between the two, and the progression journal.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod error;
pub mod journal;
pub mod persist;
pub mod store;

pub use codec::{
    BASELINE_HEADER, Columnar, DELTA_HEADER, decode_table, encode_table, read_baseline, read_delta, read_table,
    StagedTable, stage_table, write_baseline, write_delta, write_table,
};
pub use config::StorageConfig;
pub use error::{CodecError, StorageError, StorageResult};
pub use journal::{JournalEvent, JournalOperation, ProgressionJournal};
pub use persist::{FlushOutcome, LoadOutcome, SnapshotPersister};
pub use store::{ActiveExport, ActivePair, SnapshotStore, StoreStats};
