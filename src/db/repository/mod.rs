//! Repository layer: table-scoped database operations.

mod book;
mod claim;
mod stage_output;

pub use book::*;
pub use claim::*;
pub use stage_output::*;
