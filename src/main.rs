use anyhow::{Context, Result};
use cascade::app::AppContext;
use cascade::cli::commands::{HistoryCommand, InfoCommand, RegisterCommand, RunCommand, StagesCommand};
use cascade::cli::output::*;
use cascade::cli::{Cli, Command};
use cascade::core::Settings;
use cascade::execution::{self, PipelineEvents};
use cascade::persistence::{InMemoryBuildStore, PipelineInfo};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let settings = load_settings(&cli)?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, settings).await?,
        Command::Info(cmd) => show_info(cmd, settings).await?,
        Command::History(cmd) => show_history(cmd, settings).await?,
        Command::Register(cmd) => register_pipeline(cmd, settings).await?,
        Command::Stages(cmd) => list_stages(cmd, settings).await?,
    }

    Ok(())
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    if let Some(root) = &cli.data_root {
        settings.data_root = root.clone();
    }
    Ok(settings)
}

async fn open_app(settings: Settings, persistent: bool) -> Result<Arc<AppContext>> {
    let app = if persistent {
        AppContext::open(settings).await?
    } else {
        AppContext::new(settings, Arc::new(InMemoryBuildStore::new()))?
    };
    Ok(Arc::new(app))
}

async fn run_pipeline(cmd: &RunCommand, settings: Settings) -> Result<()> {
    let app = open_app(settings, !cmd.no_history).await?;
    let overrides = cmd.overrides();

    let mut pipeline = match execution::prepare(Arc::clone(&app), &cmd.id, &overrides).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            println!("{} {}", CROSS, style(&e).red());
            std::process::exit(1);
        }
    };

    println!(
        "{} Loaded pipeline {} ({} stages)",
        INFO,
        style(&pipeline.id).bold(),
        style(pipeline.stage_count()).cyan()
    );

    let events: Arc<dyn PipelineEvents> = Arc::new(ConsoleEvents::new(pipeline.stage_count()));
    let result = pipeline.run(&overrides, Some(events)).await;

    println!("\n{}", format_report(&pipeline, &result));
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn show_info(cmd: &InfoCommand, settings: Settings) -> Result<()> {
    let app = open_app(settings, true).await?;

    match execution::get_info(&app, &cmd.id).await? {
        Some(record) if cmd.json => println!("{}", serde_json::to_string_pretty(&record)?),
        Some(record) => println!("{}", format_build_details(&record)),
        None => println!("{} No builds of {} yet", WARN, style(&cmd.id).bold()),
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, settings: Settings) -> Result<()> {
    let app = open_app(settings, true).await?;

    let Some(id) = &cmd.id else {
        let pipelines = app.store.list_pipelines().await?;
        if pipelines.is_empty() {
            println!("{} No pipelines registered", INFO);
        } else if cmd.json {
            println!("{}", serde_json::to_string_pretty(&pipelines)?);
        } else {
            println!("{} Pipelines:", INFO);
            for info in &pipelines {
                println!("{}", format_pipeline_info(info));
            }
        }
        return Ok(());
    };

    let builds: Vec<_> = app.store.list(id).await?.into_iter().take(cmd.limit).collect();
    if builds.is_empty() {
        println!("{} No builds found for {}", INFO, style(id).bold());
        return Ok(());
    }

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&builds)?);
    } else {
        println!("{} Build history of {} (latest {}):", INFO, style(id).bold(), cmd.limit);
        for record in &builds {
            println!("  {}", format_build(record));
        }
    }

    Ok(())
}

async fn register_pipeline(cmd: &RegisterCommand, settings: Settings) -> Result<()> {
    let app = open_app(settings, true).await?;
    let info = PipelineInfo {
        id: cmd.id.clone(),
        name: cmd.name.clone().unwrap_or_else(|| cmd.id.clone()),
        next_version: cmd.version,
    };
    app.store.register_pipeline(&info).await?;

    println!(
        "{} Registered {}; next build is {}",
        CHECK,
        style(&info.name).bold(),
        style(info.next_version).cyan()
    );
    Ok(())
}

async fn list_stages(cmd: &StagesCommand, settings: Settings) -> Result<()> {
    let app = open_app(settings, false).await?;
    let pipeline = execution::prepare(app, &cmd.id, &Default::default()).await?;

    if cmd.json {
        let stages: Vec<_> = pipeline
            .stages()
            .iter()
            .map(|stage| {
                serde_json::json!({
                    "name": stage.name,
                    "uses": stage.uses,
                    "run_on_error": stage.run_on_error,
                    "progress": pipeline.stage_progress(stage),
                    "config": pipeline.app().secrets.strip(&stage.config),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&stages)?);
        return Ok(());
    }

    println!("{} Stages of {}:", INFO, style(&pipeline.id).bold());
    for stage in pipeline.stages() {
        println!("{}", format_stage(&pipeline, stage));
    }
    Ok(())
}
