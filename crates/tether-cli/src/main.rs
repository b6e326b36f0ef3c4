use async_trait::async_trait;
use clap::Parser;
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_core::impls::InMemoryStore;
use tether_core::ports::Store;
use tether_core::{
    HandlerError, HandlerResult, SchedulerConfig, TaskContext, TaskHandler, TaskId, TaskInfo,
    TaskScheduler, TaskState,
};

const CHAIN: &str = "demo.chain";
const COUNTDOWN: &str = "demo.countdown";

/// Runs a few participants over one in-memory store and prints where every
/// task ended up.
#[derive(Debug, Parser)]
#[command(name = "tether", version)]
struct Args {
    /// JSON scheduler config. Without it a fast local profile is used.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 3)]
    participants: usize,

    /// Length of the prerequisite chain.
    #[arg(long, default_value_t = 5)]
    chain: usize,

    /// Starting value of the countdown task.
    #[arg(long, default_value_t = 5)]
    countdown: u32,

    /// Delay between countdown steps.
    #[arg(long, default_value_t = 200)]
    delay_ms: u64,
}

/// Every link takes the same named lock, so links also serialize on it.
struct ChainHandler;

#[async_trait]
impl TaskHandler for ChainHandler {
    async fn run(&self, ctx: TaskContext) -> HandlerResult {
        info!(task_id = %ctx.task().task_id, link = %ctx.task().entity_id, "chain link running");
        sleep(Duration::from_millis(50)).await;
        Ok(None)
    }
}

struct CountdownHandler {
    delay_ms: u64,
}

#[async_trait]
impl TaskHandler for CountdownHandler {
    async fn run(&self, ctx: TaskContext) -> HandlerResult {
        let n: u32 = ctx
            .checkpoint_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| HandlerError::new("countdown checkpoint is not a number"))?;
        info!(task_id = %ctx.task().task_id, n, "countdown");
        if n <= 1 {
            return Ok(None);
        }
        let next = ctx
            .into_task()
            .with_checkpoint_data((n - 1).to_string())
            .with_delay_ms(self.delay_ms);
        Ok(Some(next))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    participants: usize,
    tasks: Vec<TaskInfo>,
}

fn load_config(path: Option<&PathBuf>, node: usize) -> Result<SchedulerConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => SchedulerConfig::from_path(path)?,
        None => SchedulerConfig::new()
            .heartbeat(Duration::from_millis(500))
            .poll_interval(Duration::from_millis(250))
            .max_dispatch_jitter(Duration::from_millis(20)),
    };
    Ok(config.node_identity(format!("demo-{node}")))
}

async fn wait_for_all(scheduler: &TaskScheduler, ids: &[TaskId]) -> Result<Vec<TaskInfo>, Box<dyn Error>> {
    loop {
        let mut done = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = scheduler.get_task(*id).await?
                && task.is_terminal()
            {
                done.push(task);
            }
        }
        if done.len() == ids.len() {
            return Ok(done);
        }
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    // (A) 全参加者が同じ Store を共有する
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let chain: Arc<dyn TaskHandler> = Arc::new(ChainHandler);
    let countdown: Arc<dyn TaskHandler> = Arc::new(CountdownHandler {
        delay_ms: args.delay_ms,
    });

    let mut participants = Vec::new();
    for node in 0..args.participants.max(1) {
        let scheduler = TaskScheduler::builder()
            .config(load_config(args.config.as_ref(), node)?)
            .store(Arc::clone(&store))
            .register(CHAIN, Arc::clone(&chain))?
            .register(COUNTDOWN, Arc::clone(&countdown))?
            .expect_entity_types(&[CHAIN, COUNTDOWN])
            .build()?;
        scheduler.monitor_task_queue();
        participants.push(scheduler);
    }
    let submitter = &participants[0];

    // (B) prerequisite の鎖と countdown を投入
    let mut ids = Vec::new();
    let mut previous: Option<TaskId> = None;
    for link in 1..=args.chain {
        let mut builder = submitter.create_task(CHAIN, format!("link-{link}")).lock_id("demo/chain");
        if let Some(prerequisite) = previous {
            builder = builder.prerequisite(prerequisite);
        }
        let task = submitter.add_task(builder.build()).await?;
        previous = Some(task.task_id);
        ids.push(task.task_id);
    }
    let task = submitter
        .add_task(
            submitter
                .create_task(COUNTDOWN, "countdown")
                .checkpoint_data(args.countdown.to_string())
                .build(),
        )
        .await?;
    ids.push(task.task_id);

    // (C) 全タスクが終端に達するまで待つ（Ctrl-C で中断）
    let finished = tokio::select! {
        done = wait_for_all(submitter, &ids) => Some(done?),
        _ = tokio::signal::ctrl_c() => None,
    };

    // (D) graceful shutdown: lease を解放してから終了
    for participant in &participants {
        participant.stop_task_queue_monitor(false).await;
    }

    match finished {
        Some(tasks) => {
            let failed = tasks.iter().filter(|t| t.state != TaskState::Success).count();
            let summary = Summary {
                participants: participants.len(),
                tasks,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if failed > 0 {
                return Err(format!("{failed} task(s) did not succeed").into());
            }
        }
        None => info!("interrupted"),
    }
    Ok(())
}
