use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use steadyhand::agent_engine::engine::TaskEngine;
use steadyhand::agent_engine::scheduler::TaskScheduler;
use steadyhand::agent_engine::state::{Task, TaskRequest};
use steadyhand::config::{self, AppConfig};
use steadyhand::executor::command::ClickAction;

#[derive(Debug, Parser)]
#[command(name = "steadyhand", version, about = "Visually verified pointer control")]
struct Cli {
    /// Path to config.toml (defaults to next to the executable, then the working directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Move onto an element without clicking.
    #[arg(long, value_name = "TARGET")]
    hover: Vec<String>,

    /// Double-click an element.
    #[arg(long = "double-click", value_name = "TARGET")]
    double_click: Vec<String>,

    /// Right-click an element.
    #[arg(long = "right-click", value_name = "TARGET")]
    right_click: Vec<String>,

    /// Click into an element and type text, given as TARGET=TEXT.
    #[arg(long = "type", value_name = "TARGET=TEXT", value_parser = parse_type_arg)]
    type_into: Vec<(String, String)>,

    /// Write the effective configuration to this path and exit.
    #[arg(long, value_name = "FILE")]
    write_config: Option<PathBuf>,

    /// Outcome that must be visible after every task, checked by the verifier.
    #[arg(long)]
    expect: Option<String>,

    /// Elements to click, in order.
    targets: Vec<String>,
}

fn parse_type_arg(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((target, text)) if !target.trim().is_empty() => Ok((target.trim().to_string(), text.to_string())),
        _ => Err(format!("expected TARGET=TEXT, got {raw:?}")),
    }
}

impl Cli {
    fn tasks(&self) -> Vec<Task> {
        let mut tasks = Vec::new();
        let mut push = |identifier: &str, request: TaskRequest| {
            let mut task = Task::from_request(identifier, request);
            if let Some(expect) = &self.expect {
                task = task.with_expected_outcome(expect.clone());
            }
            tasks.push(task);
        };

        for target in &self.targets {
            push(target.as_str(), TaskRequest::MoveAndClick {
                target: target.clone(),
                action: ClickAction::Click,
            });
        }
        for target in &self.double_click {
            push(target.as_str(), TaskRequest::MoveAndClick {
                target: target.clone(),
                action: ClickAction::DoubleClick,
            });
        }
        for target in &self.right_click {
            push(target.as_str(), TaskRequest::MoveAndClick {
                target: target.clone(),
                action: ClickAction::RightClick,
            });
        }
        for target in &self.hover {
            push(target.as_str(), TaskRequest::Move { target: target.clone() });
        }
        for (target, text) in &self.type_into {
            push(target.as_str(), TaskRequest::Type {
                target: target.clone(),
                text: text.clone(),
            });
        }
        tasks
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    steadyhand::init_tracing();
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let cfg = match config::load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) if cli.config.is_some() => {
            tracing::error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            tracing::warn!(error = %e, "no usable config; using defaults");
            AppConfig::default()
        }
    };

    if let Some(path) = &cli.write_config {
        return match config::save_config(&cfg, path) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, path = %path.display(), "failed to write config");
                ExitCode::FAILURE
            }
        };
    }

    let tasks = cli.tasks();
    if tasks.is_empty() {
        tracing::warn!("nothing to do; pass at least one TARGET");
        return ExitCode::SUCCESS;
    }

    let engine = match TaskEngine::from_config(&cfg).await {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(error = %e, "failed to start engine");
            return ExitCode::FAILURE;
        }
    };
    if !engine.initialize().await {
        tracing::warn!("could not center the pointer; continuing");
    }

    let scheduler = TaskScheduler::new(engine.clone(), &cfg.scheduler);
    for task in tasks {
        scheduler.enqueue(task);
    }
    scheduler.run();

    tokio::select! {
        _ = scheduler.wait_until_idle() => {}
        _ = tokio::signal::ctrl_c() => tracing::warn!("interrupted"),
    }
    scheduler.shutdown();
    if !scheduler.wait_for_completion().await {
        tracing::warn!("scheduler worker did not stop in time");
    }
    engine.shutdown(Duration::from_secs(2)).await;

    let metrics = scheduler.metrics();
    let dead = scheduler.dead_letters();
    tracing::info!(
        processed = metrics.tasks_processed,
        failed = metrics.tasks_failed,
        dead_lettered = metrics.dead_lettered,
        avg_secs = metrics.average_processing_time,
        "run finished"
    );
    for task in &dead {
        tracing::error!(
            task = %task.id,
            identifier = %task.identifier,
            error = task.last_error.as_deref().unwrap_or("unknown"),
            "task dead-lettered"
        );
    }

    if dead.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
