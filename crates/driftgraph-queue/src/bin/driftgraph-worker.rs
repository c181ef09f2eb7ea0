use clap::Parser;
use driftgraph_core::{logging::init_tracing, ConfigManager};
use driftgraph_graph::{GraphService, InMemoryGraphRepository};
use driftgraph_queue::{GraphJobHandler, JobQueue, RepeatScheduler, Worker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "driftgraph-worker", version, about = "Run the DriftGraph background worker")]
struct Args {
    /// Directory holding default/{env}/local settings files
    #[arg(long, env = "DRIFTGRAPH_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Settings environment (development, staging, production, ...)
    #[arg(long, env = "APP_ENV")]
    env: Option<String>,

    /// Project to register for periodic full scans; repeatable
    #[arg(long = "project")]
    projects: Vec<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = ConfigManager::new(args.config_dir, args.env).load()?;
    settings.logging.json |= args.json_logs;
    init_tracing(&settings.logging)?;
    info!(env = %settings.env, "starting driftgraph worker");

    let repo = Arc::new(InMemoryGraphRepository::new());
    let service = Arc::new(GraphService::new(repo, settings.graph.clone()));
    let queue = Arc::new(JobQueue::new(settings.queues.graph.clone()));
    let handler = Arc::new(GraphJobHandler::new(service));

    let scheduler = RepeatScheduler::new(queue.clone(), settings.scheduler.full_scan_every());
    for project in settings.scheduler.projects.iter().chain(args.projects.iter()) {
        scheduler.schedule_full_scan(project);
    }

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(Worker::new(queue.clone(), handler).run(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    scheduler.shutdown();
    cancel.cancel();
    worker.await?;

    let counts = queue.counts();
    info!(
        completed = counts.completed,
        failed = counts.failed,
        waiting = counts.waiting + counts.delayed,
        "driftgraph worker stopped"
    );
    Ok(())
}
