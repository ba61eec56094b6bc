mod collab;
mod config;
mod dispatch;
mod errors;
mod logging;
mod security;
mod server;
mod tasks;
#[cfg(test)]
mod tests;

use crate::{
    collab::Collaborators,
    config::Config,
    dispatch::{
        registry::{TaskRegistry, TaskRequest},
        types::Outcome,
    },
    errors::TaskError,
    tasks::TaskContext,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Run side-effecting tasks confined to one storage root")]
struct Cli {
    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(long, global = true, default_value = "warden.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP dispatch endpoints
    Serve,
    /// Run one task and print its outcome as JSON
    Run {
        task: String,
        /// Task argument as key=value; repeatable
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
        /// Task arguments as a JSON object, merged under any --arg values
        #[arg(long = "args", value_name = "JSON")]
        args_json: Option<String>,
        /// Timeout in seconds, capped at limits.task_timeout_s
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List registered tasks and their input schemas
    Tasks,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(matches!(cli.command, Command::Serve));

    let registry = TaskRegistry::new();
    if let Command::Tasks = cli.command {
        for name in registry.list_names() {
            if let Some(task) = registry.get(&name) {
                println!("{name}\t{}", task.capabilities()["input"]);
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = Config::load(&cli.config).with_context(|| format!("loading config {}", cli.config.display()))?;
    cfg.validate().context("validating config")?;
    let cfg = Arc::new(cfg);
    let collab = Collaborators::from_config(&cfg).context("building collaborators")?;
    let ctx = TaskContext::new(cfg.clone(), collab).context("resolving root")?;

    match cli.command {
        Command::Serve => {
            let state = server::AppState::new(ctx, registry);
            let srv = &cfg.server;
            info!(addr = %format!("{}:{}", srv.bind_addr, srv.port), root = %state.ctx.guard.root().display(), tasks = ?state.registry.list_names(), "warden ready");
            server::serve(state).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { task, args, args_json, timeout } => {
            let outcome = match collect_args(&args, args_json.as_deref()) {
                Ok(args) => {
                    let req = TaskRequest { task, args, timeout_s: timeout };
                    Outcome::new(None, registry.dispatch(&ctx, req).await)
                }
                Err(e) => Outcome::new(None, Err(e)),
            };
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(if outcome.ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Tasks => Ok(ExitCode::SUCCESS),
    }
}

/// Builds the argument object from `--args` JSON and `--arg key=value` pairs.
fn collect_args(pairs: &[String], json: Option<&str>) -> Result<Value, TaskError> {
    let mut map = match json {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(m)) => m,
            Ok(_) => return Err(TaskError::InvalidArgument("--args must be a JSON object".into())),
            Err(e) => return Err(TaskError::InvalidArgument(format!("--args: {e}"))),
        },
        None => Map::new(),
    };
    for pair in pairs {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| TaskError::InvalidArgument(format!("--arg {pair:?} is not key=value")))?;
        map.insert(k.to_string(), Value::String(v.to_string()));
    }
    Ok(Value::Object(map))
}
