//! Built-in stage kinds

use crate::core::{format_elapsed, StageAction, StageConfig, StageContext};
use crate::stages::StageCatalog;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tracing::{info, warn};

pub fn register_all(catalog: &mut StageCatalog) {
    catalog.register_builtin("hello-world", HelloWorld);
    catalog.register_builtin("shell", Shell);
    catalog.register_builtin("message", MessageStage);
    catalog.register_builtin("notify", Notify);
}

fn config_str<'a>(config: &'a StageConfig, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

/// Logs a greeting; handy for checking a fresh install
pub struct HelloWorld;

#[async_trait]
impl StageAction for HelloWorld {
    async fn run(&self, ctx: &mut StageContext<'_>, config: &mut StageConfig) -> Result<()> {
        let name = config_str(config, "name").unwrap_or("world");
        info!("Hello {} from pipeline {}", name, ctx.pipeline_id);
        ctx.workspace.add_message("info", format!("Hello {}", name));
        Ok(())
    }
}

/// Runs `command` through `sh -c` in the workspace directory
///
/// Config:
/// - `command` (required)
/// - `env`: map of extra environment variables
///
/// Writes `exit_code` and `output` (trimmed stdout) back into the config.
pub struct Shell;

#[async_trait]
impl StageAction for Shell {
    async fn run(&self, ctx: &mut StageContext<'_>, config: &mut StageConfig) -> Result<()> {
        let command = config_str(config, "command")
            .context("shell stage needs a 'command'")?
            .to_string();

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(ctx.workspace.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(Value::Object(env)) = config.get("env") {
            for (key, value) in env {
                match value {
                    Value::String(s) => cmd.env(key, s),
                    other => cmd.env(key, other.to_string()),
                };
            }
        }

        info!("[{}] $ {}", ctx.stage, command);
        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to spawn '{}'", command))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output.status.code();

        config.insert("exit_code".into(), code.map(Value::from).unwrap_or(Value::Null));
        config.insert("output".into(), Value::String(stdout));

        if !output.status.success() {
            ctx.workspace
                .add_message("shell", format!("'{}' failed: {}", command, stderr));
            match code {
                Some(code) => bail!("'{}' exited with status {}: {}", command, code, stderr),
                None => bail!("'{}' was terminated by a signal", command),
            }
        }

        ctx.workspace.add_message("shell", format!("'{}' succeeded", command));
        Ok(())
    }
}

/// Appends a configured message to the workspace
pub struct MessageStage;

#[async_trait]
impl StageAction for MessageStage {
    async fn run(&self, ctx: &mut StageContext<'_>, config: &mut StageConfig) -> Result<()> {
        let text = config_str(config, "text").context("message stage needs a 'text'")?;
        let kind = config_str(config, "type").unwrap_or("info");
        ctx.workspace.add_message(kind, text);
        Ok(())
    }
}

/// Reports the outcome of the run; also runs after a failure
pub struct Notify;

impl Notify {
    fn summary(ctx: &StageContext<'_>) -> String {
        let workspace = &*ctx.workspace;
        let outcome = if workspace.has_errors() { "failed" } else { "succeeded" };

        let mut lines = vec![format!(
            "{} {} {} in {}",
            ctx.pipeline_id,
            workspace.version,
            outcome,
            format_elapsed(workspace.elapsed())
        )];
        lines.extend(workspace.errors.iter().map(|e| format!("  error: {}", e)));
        lines.extend(
            workspace
                .messages
                .iter()
                .map(|m| format!("  {}: {}", m.kind, m.text)),
        );
        lines.join("\n")
    }
}

#[async_trait]
impl StageAction for Notify {
    async fn run(&self, ctx: &mut StageContext<'_>, config: &mut StageConfig) -> Result<()> {
        let summary = Self::summary(ctx);
        if ctx.workspace.has_errors() {
            warn!("{}", summary);
        } else {
            info!("{}", summary);
        }

        config.insert("summary".into(), Value::String(summary));
        Ok(())
    }

    fn run_on_error(&self) -> bool {
        true
    }
}
