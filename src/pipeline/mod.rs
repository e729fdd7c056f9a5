pub mod backend;
pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod pool;
pub mod segment;
pub mod speech;
pub mod stages;
pub mod store;
pub mod tasks;
pub mod transform;

pub use error::PipelineError;
pub use orchestrator::{BookReport, Orchestrator, StageStatus};
