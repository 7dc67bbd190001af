//! Due-job and job-queue polling loops

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tempo_core::domain::job::{Job, JobStatus};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::queue::JobQueue;
use crate::repository::Storage;
use crate::worker::WorkerPool;

/// Feeds due and queued jobs into the worker pool
pub struct Scheduler {
    job_queue: Arc<dyn JobQueue>,
    storage: Arc<dyn Storage>,
    pool: Arc<WorkerPool>,
}

impl Scheduler {
    pub fn new(job_queue: Arc<dyn JobQueue>, storage: Arc<dyn Storage>, pool: Arc<WorkerPool>) -> Self {
        Self {
            job_queue,
            storage,
            pool,
        }
    }

    /// Scans storage for due jobs every `every` until `cancel` fires
    pub async fn schedule(&self, cancel: CancellationToken, every: Duration) {
        info!("Starting due-job scheduler (interval: {:?})", every);
        let mut interval = time::interval(every);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Due-job scheduler shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    match self.schedule_tick().await {
                        Ok(0) => debug!("No due jobs"),
                        Ok(scheduled) => info!("Scheduled {} job(s) this cycle", scheduled),
                        Err(e) => error!("Error during schedule cycle: {:#}", e),
                    }
                }
            }
        }
        info!("Due-job scheduler stopped");
    }

    /// Pops one queued job every `every` until `cancel` fires
    pub async fn dispatch(&self, cancel: CancellationToken, every: Duration) {
        info!("Starting job-queue dispatcher (interval: {:?})", every);
        let mut interval = time::interval(every);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Job-queue dispatcher shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.dispatch_tick().await {
                        error!("Error during dispatch cycle: {:#}", e);
                    }
                }
            }
        }
        info!("Job-queue dispatcher stopped");
    }

    /// Submits every due job once, returning how many were submitted
    ///
    /// A failing job is logged and skipped; only the due scan itself can fail
    /// the tick.
    pub async fn schedule_tick(&self) -> Result<usize> {
        let due = self.storage.get_due_jobs().await?;
        debug!(due = due.len(), "Scanning due jobs");

        let mut scheduled = 0;
        for job in due {
            let job_id = job.id;
            match self.submit(job).await {
                Ok(true) => scheduled += 1,
                Ok(false) => {}
                Err(e) => error!(job_id = %job_id, "Failed to schedule job: {:#}", e),
            }
        }
        Ok(scheduled)
    }

    /// Submits at most one queued job, returning whether one was submitted
    pub async fn dispatch_tick(&self) -> Result<bool> {
        let Some(job) = self.job_queue.pop().await else {
            return Ok(false);
        };
        debug!(job_id = %job.id, "Popped job from queue");

        // The queued copy may be stale
        let job = self.storage.get_job(job.id).await?;
        self.submit(job).await
    }

    /// Resolves the runnable chain of `job` and hands it to the pool
    ///
    /// Returns `false` when the job is skipped.
    async fn submit(&self, job: Job) -> Result<bool> {
        let Some(mut head) = self.resolve(job).await? else {
            return Ok(false);
        };

        head.mark_scheduled(Utc::now());
        self.storage.update_job(&head).await?;

        let work = self.pool.create_work(head.clone())?;
        if let Err(e) = self.pool.dispatch(work).await {
            warn!(job_id = %head.id, "Dispatch failed, returning job to pending: {}", e);
            head.mark_pending();
            self.storage.update_job(&head).await?;
            return Err(e);
        }

        debug!(job_id = %head.id, name = %head.name, "Job submitted");
        Ok(true)
    }

    /// Applies the skip rules and returns the head of the chain to run
    async fn resolve(&self, job: Job) -> Result<Option<Job>> {
        let Some(pipeline_id) = job.pipeline_id else {
            if job.disable {
                debug!(job_id = %job.id, "Skipping disabled job");
                return Ok(None);
            }
            return Ok(Some(job));
        };

        let mut pipeline = self.storage.get_pipeline(pipeline_id).await?;

        if pipeline.disable {
            debug!(pipeline_id = %pipeline.id, "Skipping disabled pipeline");
            self.storage.recycle_pipeline(&mut pipeline).await?;
            return Ok(None);
        }

        if pipeline.options.cancel_on_failure && pipeline.status == JobStatus::Failed {
            info!(pipeline_id = %pipeline.id, "Pipeline failed earlier, re-arming instead of running");
            self.storage.recycle_pipeline(&mut pipeline).await?;
            return Ok(None);
        }

        // Followers run inside their head's chain
        if pipeline.head_id() != Some(job.id) {
            debug!(job_id = %job.id, pipeline_id = %pipeline.id, "Skipping non-head pipeline job");
            return Ok(None);
        }

        // The previous run still owns the pipeline; the head stays due
        if matches!(pipeline.status, JobStatus::Scheduled | JobStatus::InProgress) {
            debug!(pipeline_id = %pipeline.id, status = %pipeline.status, "Pipeline still running");
            return Ok(None);
        }

        let chain = self.load_chain(pipeline.id, job, pipeline.jobs.len()).await?;
        if chain.len() != pipeline.jobs.len() {
            return Err(EngineError::BrokenChain(pipeline.id));
        }
        Ok(Job::link_chain(chain))
    }

    /// Follows `next_job_id` from `head`, reading each job from storage
    async fn load_chain(&self, pipeline_id: Uuid, head: Job, expected: usize) -> Result<Vec<Job>> {
        let mut chain = vec![head];
        while let Some(next_id) = chain.last().and_then(|job| job.next_job_id) {
            if chain.len() >= expected {
                return Err(EngineError::BrokenChain(pipeline_id));
            }
            let next = match self.storage.get_job(next_id).await {
                Ok(next) => next,
                Err(e) if e.is_not_found() => {
                    return Err(EngineError::BrokenChain(pipeline_id));
                }
                Err(e) => return Err(e.into()),
            };
            chain.push(next);
        }
        Ok(chain)
    }
}
