//! Core domain models for pipelines
//!
//! This module defines stages, the per-run workspace, the stage registry
//! and the build state shared with the build store.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod secrets;
pub mod stage;
pub mod state;
pub mod workspace;

pub use config::{Settings, SettingsOverride};
pub use error::{PipelineError, StageFault};
pub use pipeline::*;
pub use stage::*;
pub use state::*;
pub use workspace::*;
