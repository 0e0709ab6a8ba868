//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, InfoCommand, RegisterCommand, RunCommand, StagesCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Self-hosted continuous-delivery pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "cascade")]
#[command(version)]
#[command(about = "A self-hosted continuous-delivery pipeline orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a settings YAML file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data root from the settings
    #[arg(long, global = true)]
    pub data_root: Option<PathBuf>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Show the latest build of a pipeline
    Info(InfoCommand),

    /// Show build history
    History(HistoryCommand),

    /// Register a pipeline and its next version
    Register(RegisterCommand),

    /// List the stages of a pipeline
    Stages(StagesCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
