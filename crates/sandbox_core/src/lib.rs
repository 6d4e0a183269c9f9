//! Sandbox snapshot core types
//!
//! Identities, the row model shared by baseline and delta files, payload
//! hashing, and the traits a host implements to capture and restore live
//! state. This crate performs no I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod error;
pub mod hash;
pub mod id;
pub mod record;
pub mod snapshot;

// Re-exports
pub use capture::{CaptureSource, RestoreApplier};
pub use error::{CoreError, CoreResult};
pub use hash::{PayloadHash, decode_payload, encode_payload};
pub use id::{PlayerIdentity, PlayerKey, SnapshotId};
pub use record::{
    BaselineRow, COMPONENT_ROW_TYPE, ComponentState, DeltaKind, DeltaPayload, DeltaRow, DeltaShape, EntityEntry,
    Position, ROW_FORMAT_VERSION, RowContext, short_type_name,
};
pub use snapshot::{
    BaselineSnapshot, DeltaSnapshot, PendingContext, SnapshotHeader, group_baseline_rows, group_delta_rows,
};
