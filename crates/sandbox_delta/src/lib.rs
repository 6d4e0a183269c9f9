//! Sandbox snapshot delta computer
//!
//! Pure comparison of two captures of the same player. The structural diff
//! covers components and zone entities; derived detectors add semantic rows
//! decoded from payload contents. Nothing here performs I/O or holds shared
//! state.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod component;
pub mod detector;
pub mod engine;
pub mod entity;
pub mod error;

pub use component::compute_component_delta;
pub use detector::{DerivedDetector, OpenedTechDetector, UNLOCK_KEY_MARKERS, extract_opened_tech};
pub use engine::{DeltaEngine, DeltaInput, DeltaSummary};
pub use entity::compute_entity_delta;
pub use error::{DeltaError, DeltaResult};
