//! heddle - ファイル claim 付きタスクプールをコマンドラインから動かす
//!
//! ```text
//! heddle run --tasks tasks.json --state-dir .heddle -- ./worker.sh --flag
//! heddle subdivide "Refactor auth" src/a.ts src/b.ts lib/c.ts
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use heddle_core::impls::ProcessLauncher;
use heddle_core::subdivide::subdivide;
use heddle_core::{PoolBuilder, PoolConfig, TaskId, TaskSpec};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "heddle", version, about = "Run file-disjoint tasks on a bounded worker pool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit tasks from a JSON file and run each one as a worker process.
    Run {
        /// Pool configuration (camelCase JSON). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for `claims.json` and `events.jsonl`; overrides `stateDir`.
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// JSON array of `{ "description", "files", "priority"?, "payload"? }`.
        #[arg(long)]
        tasks: Option<PathBuf>,

        /// Split every task by directory before submitting it.
        #[arg(long)]
        subdivide: bool,

        /// Per-task wait limit in seconds; a task still running after it is cancelled.
        #[arg(long, default_value_t = 3600)]
        wait_secs: u64,

        /// Worker program and its arguments.
        #[arg(last = true, required = true, num_args = 1..)]
        worker: Vec<String>,
    },

    /// Print how a task would be split, as JSON.
    Subdivide {
        description: String,

        #[arg(required = true, num_args = 1..)]
        files: Vec<String>,
    },
}

/// Final line printed by `run`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    completed: Vec<TaskId>,
    unfinished: Vec<Unfinished>,
    stats: heddle_core::PoolStats,
}

#[derive(Debug, Serialize)]
struct Unfinished {
    task: TaskId,
    error: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run {
            config,
            state_dir,
            tasks,
            subdivide: split,
            wait_secs,
            worker,
        } => {
            run(
                config,
                state_dir,
                tasks,
                split,
                Duration::from_secs(wait_secs),
                worker,
            )
            .await
        }
        Command::Subdivide { description, files } => {
            let subtasks = subdivide(&description, &files)?;
            println!("{}", serde_json::to_string_pretty(&subtasks)?);
            Ok(())
        }
    }
}

async fn run(
    config: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    tasks: Option<PathBuf>,
    split: bool,
    wait: Duration,
    worker: Vec<String>,
) -> Result<(), Box<dyn Error>> {
    // (A) 設定と launcher
    let mut config = match config {
        Some(path) => PoolConfig::from_json_file(path)?,
        None => PoolConfig::default(),
    };
    if state_dir.is_some() {
        config.state_dir = state_dir;
    }
    let Some((program, args)) = worker.split_first() else {
        return Err("missing worker program".into());
    };
    let launcher = ProcessLauncher::new(program).args(args.iter().cloned());

    // (B) プールを構築して復旧
    let pool = PoolBuilder::new().config(config).launcher(launcher).build()?;
    let report = pool.initialize().await?;
    info!(
        recovered = report.tasks,
        pending = report.pending,
        busy = report.busy_slots.len(),
        orphaned = report.orphaned_slots.len(),
        "state recovered"
    );

    // (C) タスク投入
    let specs: Vec<TaskSpec> = match tasks {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => Vec::new(),
    };
    let mut ids = Vec::new();
    for spec in specs {
        if split {
            let TaskSpec {
                description,
                priority,
                files,
                payload,
            } = spec;
            ids.extend(
                pool.submit_subdivided(&description, &files, priority, payload)
                    .await?,
            );
        } else {
            ids.push(pool.submit_task(spec).await?);
        }
    }
    // 復旧したタスクも待つ
    for task in pool.tasks().await? {
        if !task.status.is_terminal() && !ids.contains(&task.id) {
            ids.push(task.id);
        }
    }
    info!(tasks = ids.len(), "waiting for tasks");

    // (D) 完了待ち。Ctrl-C で中断
    let waited = tokio::select! {
        outcome = wait_all(&pool, &ids, wait) => Some(outcome),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; pending work stays in the state directory");
            None
        }
    };

    let stats = pool.get_stats().await?;
    pool.shutdown().await;
    info!(
        completed = stats.completed,
        failed = stats.failed_count,
        cancelled = stats.cancelled,
        in_flight = stats.in_flight(),
        "pool stopped"
    );

    if let Some((completed, unfinished)) = waited {
        let failed = !unfinished.is_empty();
        let summary = RunSummary {
            completed,
            unfinished,
            stats,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        if failed {
            return Err("some tasks did not complete".into());
        }
    }
    Ok(())
}

async fn wait_all(
    pool: &heddle_core::Pool,
    ids: &[TaskId],
    wait: Duration,
) -> (Vec<TaskId>, Vec<Unfinished>) {
    let mut completed = Vec::new();
    let mut unfinished = Vec::new();
    for &id in ids {
        match pool.wait_for_task(id, wait).await {
            Ok(_) => completed.push(id),
            Err(e) => {
                warn!(task = %id, error = %e, "task did not complete");
                unfinished.push(Unfinished {
                    task: id,
                    error: e.to_string(),
                });
            }
        }
    }
    (completed, unfinished)
}
