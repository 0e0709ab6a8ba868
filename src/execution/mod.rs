//! Pipeline execution

pub mod engine;
pub mod events;
pub mod launcher;

pub use engine::ExecutionEngine;
pub use events::{FnEvents, PipelineEvent, PipelineEvents};
pub use launcher::{get_info, launch, prepare, run};
