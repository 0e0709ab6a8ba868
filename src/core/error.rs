//! Error types for pipeline definition and execution

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failure raised by (or forced onto) a single stage
///
/// Recorded in the workspace error list and used to reject the run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Stage '{stage}' failed: {message}")]
pub struct StageFault {
    /// Name of the failing stage
    pub stage: String,

    /// Rendered error chain
    pub message: String,

    /// Raised by the `forceFailure` config flag rather than the implementation
    #[serde(default)]
    pub forced: bool,
}

impl StageFault {
    /// Capture an implementation error, keeping its full context chain
    pub fn from_error(stage: &str, error: &anyhow::Error) -> Self {
        Self {
            stage: stage.to_string(),
            message: format!("{:#}", error),
            forced: false,
        }
    }

    /// Synthetic fault for a stage configured with `forceFailure`
    pub fn forced(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            message: "forced failure requested by stage config".to_string(),
            forced: true,
        }
    }
}

/// Errors surfaced by the pipeline engine
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stage(#[from] StageFault),

    #[error("Unknown stage kind '{kind}' for stage '{stage}'")]
    UnknownStage { stage: String, kind: String },

    #[error("No definition found for pipeline '{0}'")]
    UnknownPipeline(String),

    #[error("Pipeline definition '{0}' not found for import")]
    UnknownImport(String),

    #[error("Import cycle detected: {0}")]
    ImportCycle(String),

    #[error("Pipeline definition failed: {0:#}")]
    Definition(anyhow::Error),

    #[error("Pipeline '{0}' has already been run; create a new instance")]
    AlreadyRun(String),

    #[error("Build store error: {0:#}")]
    Store(anyhow::Error),

    #[error("Event handler error: {0:#}")]
    Event(anyhow::Error),

    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

impl PipelineError {
    /// The stage fault behind this error, if the run was rejected by a stage
    pub fn stage_fault(&self) -> Option<&StageFault> {
        match self {
            PipelineError::Stage(fault) => Some(fault),
            _ => None,
        }
    }
}
