//! Tempo
//!
//! Task automation engine running in-memory jobs and pipelines until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tempo_engine::config::{Config, LogFormat};
use tempo_engine::manifest::Manifest;
use tempo_engine::queue::{FifoQueue, JobQueue};
use tempo_engine::repository::{InMemoryStorage, Storage};
use tempo_engine::scheduler::Scheduler;
use tempo_engine::service::{JobService, PipelineService};
use tempo_engine::tasks::{InMemoryTaskRegistry, TaskRegistry, register_builtin};
use tempo_engine::worker::WorkerPool;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(config.log_format);
    config.validate().context("Invalid configuration")?;

    info!("Starting Tempo");
    info!(
        workers = config.workers(),
        queue_capacity = config.queue_capacity(),
        job_queue_capacity = config.job_queue_capacity,
        timeout_unit = ?config.timeout_unit,
        "Loaded configuration"
    );

    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let job_queue: Arc<dyn JobQueue> = Arc::new(FifoQueue::new(config.job_queue_capacity));

    let mut registry = InMemoryTaskRegistry::new();
    register_builtin(&mut registry);
    let registry: Arc<dyn TaskRegistry> = Arc::new(registry);

    let task_names = registry.get_task_names();
    info!("Registered {} task(s)", task_names.len());
    for name in &task_names {
        info!("  - {}", name);
    }

    if let Some(path) = &config.manifest {
        let jobs = JobService::new(storage.clone(), job_queue.clone(), registry.clone());
        let pipelines = PipelineService::new(storage.clone(), job_queue.clone(), registry.clone());
        Manifest::load(path)?.apply(&jobs, &pipelines).await?;
    }

    let pool = Arc::new(WorkerPool::new(
        storage.clone(),
        registry,
        config.timeout_unit.duration(),
        config.workers(),
        config.queue_capacity(),
    ));
    pool.start().await;

    let scheduler = Arc::new(Scheduler::new(job_queue.clone(), storage.clone(), pool.clone()));
    let cancel = CancellationToken::new();

    let schedule_loop = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        let every = config.storage_polling_interval();
        tokio::spawn(async move { scheduler.schedule(cancel, every).await })
    };
    let dispatch_loop = {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        let every = config.job_queue_polling_interval();
        tokio::spawn(async move { scheduler.dispatch(cancel, every).await })
    };

    info!("Tempo is running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    cancel.cancel();
    for (name, handle) in [("scheduler", schedule_loop), ("dispatcher", dispatch_loop)] {
        if let Err(e) = handle.await {
            error!("{} loop terminated abnormally: {}", name, e);
        }
    }

    job_queue.close().await;

    // A second Ctrl-C cancels the jobs still running
    let pool_cancel = pool.cancellation_token();
    let force = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second shutdown signal, cancelling running jobs");
            pool_cancel.cancel();
        }
    });
    info!("Waiting for running jobs to finish");
    pool.stop().await;
    force.abort();
    storage.close().await.context("Failed to close storage")?;

    info!("Tempo stopped");
    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tempo_engine=info,tempo=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}
