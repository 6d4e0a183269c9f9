//! Sandbox session runtime
//!
//! Glue between a host's capture and restore hooks, the delta engine and
//! the snapshot store, plus the background task that persists dirty
//! snapshots.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod flush;
pub mod session;

pub use config::SessionConfig;
pub use error::{RuntimeError, RuntimeResult};
pub use flush::{FlushScheduler, flush_once};
pub use session::{ExitOutcome, FinalizeOutcome, SandboxSession};
