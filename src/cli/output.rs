//! CLI output formatting

use crate::core::{format_elapsed, BuildRecord, BuildStatus, Pipeline, PipelineError, Stage};
use crate::execution::PipelineEvents;
use crate::persistence::PipelineInfo;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a build status for display
pub fn format_status(status: BuildStatus) -> String {
    match status {
        BuildStatus::Waiting => style("WAITING").dim().to_string(),
        BuildStatus::Building => style("BUILDING").yellow().to_string(),
        BuildStatus::Success => style("SUCCESS").green().to_string(),
        BuildStatus::Failed => style("FAILED").red().to_string(),
        BuildStatus::Terminated => style("TERMINATED").magenta().to_string(),
        BuildStatus::Reserved => style("UNKNOWN").dim().to_string(),
    }
}

/// One-line summary of a build
pub fn format_build(record: &BuildRecord) -> String {
    let icon = match record.status {
        BuildStatus::Success => CHECK,
        BuildStatus::Failed | BuildStatus::Terminated => CROSS,
        BuildStatus::Building | BuildStatus::Waiting => SPINNER,
        BuildStatus::Reserved => INFO,
    };

    let duration = match (record.started, record.finished) {
        (Some(started), Some(finished)) => finished
            .signed_duration_since(started)
            .to_std()
            .map(format_elapsed)
            .unwrap_or_default(),
        _ => String::new(),
    };

    format!(
        "{}#{} {} {} - {} {}",
        icon,
        style(record.id).dim(),
        style(&record.pipeline_name).bold(),
        style(record.version).cyan(),
        format_status(record.status),
        style(duration).dim()
    )
}

/// Detailed view of a build
pub fn format_build_details(record: &BuildRecord) -> String {
    let mut lines = vec![
        format!("{} Build #{}", INFO, record.id),
        format!("  Pipeline: {} ({})", style(&record.pipeline_name).bold(), record.pipeline_id),
        format!("  Version: {}", style(record.version).cyan()),
        format!("  Status: {}", format_status(record.status)),
    ];
    if let Some(started) = record.started {
        lines.push(format!("  Started: {}", style(started.to_rfc3339()).dim()));
    }
    if let Some(finished) = record.finished {
        lines.push(format!("  Finished: {}", style(finished.to_rfc3339()).dim()));
    }
    lines.join("\n")
}

pub fn format_pipeline_info(info: &PipelineInfo) -> String {
    format!(
        "  {} {} (next version {})",
        style(&info.id).bold(),
        style(&info.name).dim(),
        style(info.next_version).cyan()
    )
}

/// Registry listing line: position, progress fraction, name and source
pub fn format_stage(pipeline: &Pipeline, stage: &Stage) -> String {
    let index = pipeline.stage_index(stage).unwrap_or_default();
    let recovery = if stage.run_on_error {
        style(" [runs on error]").yellow().to_string()
    } else {
        String::new()
    };
    format!(
        "  {:>2}. {} {} {}{}",
        index + 1,
        style(format!("{:>3.0}%", pipeline.stage_progress(stage) * 100.0)).dim(),
        style(&stage.name).bold(),
        style(format!("({})", stage.uses)).dim(),
        recovery
    )
}

/// Event sink that renders a run on the terminal
pub struct ConsoleEvents {
    progress: ProgressBar,
}

impl ConsoleEvents {
    pub fn new(total: usize) -> Self {
        Self {
            progress: create_progress_bar(total),
        }
    }
}

impl PipelineEvents for ConsoleEvents {
    fn on_start(&self, pipeline: &Pipeline) -> anyhow::Result<()> {
        self.progress.println(format!(
            "{} Building {} {}",
            ROCKET,
            style(&pipeline.id).bold(),
            style(pipeline.workspace.version).cyan()
        ));
        Ok(())
    }

    fn on_run_stage(&self, stage: &Stage, index: usize, total: usize, _pipeline: &Pipeline) -> anyhow::Result<()> {
        self.progress.set_position(index as u64);
        self.progress.set_message(stage.name.clone());
        self.progress.println(format!(
            "{} [{}/{}] {}",
            SPINNER,
            index + 1,
            total,
            style(&stage.name).cyan()
        ));
        Ok(())
    }

    fn on_failed(&self, _pipeline: &Pipeline, _error: &PipelineError) -> anyhow::Result<()> {
        self.progress.abandon();
        Ok(())
    }

    fn on_success(&self, _pipeline: &Pipeline) -> anyhow::Result<()> {
        self.progress.finish_and_clear();
        Ok(())
    }
}

/// Final report of a run
pub fn format_report(pipeline: &Pipeline, result: &Result<(), PipelineError>) -> String {
    let workspace = &pipeline.workspace;
    let elapsed = format_elapsed(workspace.elapsed());
    let mut lines = Vec::new();

    match result {
        Ok(()) => lines.push(format!(
            "{} {} {} completed {} in {}",
            CHECK,
            style(&pipeline.id).bold(),
            style(workspace.version).cyan(),
            style("successfully").green(),
            elapsed
        )),
        Err(e) => lines.push(format!(
            "{} {} {} {} after {}: {}",
            CROSS,
            style(&pipeline.id).bold(),
            style(workspace.version).cyan(),
            style("failed").red(),
            elapsed,
            e
        )),
    }

    for fault in workspace.errors.iter().skip(1) {
        lines.push(format!("  {} {}", WARN, style(fault).yellow()));
    }
    for message in &workspace.messages {
        lines.push(format!("  {} {}: {}", INFO, style(&message.kind).dim(), message.text));
    }

    lines.join("\n")
}
