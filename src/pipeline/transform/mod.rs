//! Generic shape-preserving transform: send one unit to the backend,
//! check the reply keeps the unit's cardinality, retry or halt.

pub mod context;
pub mod engine;
pub mod progress;

pub use context::preceding_context;
pub use engine::*;
pub use progress::{Progress, ProgressEvent};
