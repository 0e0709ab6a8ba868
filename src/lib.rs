//! cascade - a self-hosted continuous-delivery pipeline orchestrator

pub mod app;
pub mod cli;
pub mod core;
pub mod definition;
pub mod execution;
pub mod persistence;
pub mod stages;

// Re-export commonly used types
pub use app::AppContext;
pub use crate::core::{
    BuildRecord, BuildStatus, Pipeline, PipelineError, Settings, SettingsOverride, Stage,
    StageAction, StageConfig, StageContext, StageFault, Workspace,
};
pub use definition::{DefinitionLibrary, DefinitionResolver, PipelineDefinition};
pub use execution::{ExecutionEngine, PipelineEvent, PipelineEvents};
pub use persistence::{BuildStore, InMemoryBuildStore};
