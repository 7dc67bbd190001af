//! Worker pool and execution engine

use chrono::Utc;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempo_core::domain::job::{Job, JobResult};
use tempo_core::domain::transaction::Transaction;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::work::{Work, WorkKind};
use crate::error::{EngineError, Result};
use crate::repository::{JOB_TOPIC, Storage, TRANSACTION_TOPIC};
use crate::tasks::TaskRegistry;

/// Deadline applied to jobs without a timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

type ResultSender = mpsc::Sender<JobResult>;

/// Fixed-size pool of workers sharing one bounded channel
pub struct WorkerPool {
    storage: Arc<dyn Storage>,
    registry: Arc<dyn TaskRegistry>,
    timeout_unit: Duration,
    workers: usize,
    sender: Mutex<Option<mpsc::Sender<Work>>>,
    receiver: Mutex<mpsc::Receiver<Work>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Creates a stopped pool; call [`WorkerPool::start`] to spawn the workers
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<dyn TaskRegistry>,
        timeout_unit: Duration,
        workers: usize,
        queue_capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        Self {
            storage,
            registry,
            timeout_unit,
            workers: workers.max(1),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(receiver),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Token cancelling every in-flight execution when fired
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns the workers
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("Worker pool already started");
            return;
        }

        let mut handles = self.handles.lock().await;
        for worker_id in 0..self.workers {
            let pool = Arc::clone(self);
            handles.push(tokio::spawn(async move { pool.run_worker(worker_id).await }));
        }
        info!(workers = self.workers, "Worker pool started");
    }

    async fn run_worker(&self, worker_id: usize) {
        debug!(worker_id, "Worker started");
        loop {
            let work = self.receiver.lock().await.recv().await;
            let Some(work) = work else {
                break;
            };

            let head = work.kind().head().map(|job| job.id);
            if let Err(e) = self.exec(&self.cancel, work).await {
                error!(worker_id, job_id = ?head, "Work execution failed: {:#}", e);
            }
        }
        debug!(worker_id, "Worker stopped");
    }

    /// Flattens a (possibly chained) job into a work item
    pub fn create_work(&self, job: Job) -> Result<Work> {
        let mut jobs = job.into_chain();
        let kind = if jobs.len() == 1 {
            WorkKind::Task(jobs.remove(0))
        } else {
            let head = &jobs[0];
            let pipeline_id = head.pipeline_id.ok_or(EngineError::NotAPipeline(head.id))?;
            WorkKind::Pipeline { pipeline_id, jobs }
        };
        Ok(Work::new(kind, self.timeout_unit))
    }

    /// Hands work over to the workers, waiting while the channel is full
    ///
    /// Results of the work are persisted in the background unless the
    /// caller already took the result receiver.
    pub async fn dispatch(&self, mut work: Work) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or(EngineError::PoolStopped)?;

        if let Some(results) = work.take_results() {
            self.persist_results(results);
        }

        debug!(jobs = work.kind().len(), "Dispatching work");
        sender.send(work).await.map_err(|_| EngineError::PoolStopped)
    }

    fn persist_results(&self, mut results: mpsc::Receiver<JobResult>) {
        let storage = Arc::clone(&self.storage);
        tokio::spawn(async move {
            while let Some(result) = results.recv().await {
                if let Err(e) = storage.create_job_result(&result).await {
                    error!(job_id = %result.job_id, "Failed to store job result: {}", e);
                }
            }
        });
    }

    /// Closes the channel and waits for the workers to drain it
    pub async fn stop(&self) {
        self.sender.lock().await.take();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker terminated abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }

    /// Executes one work item
    ///
    /// Task failures end up in the jobs' state and results; only persistence
    /// errors are returned.
    pub async fn exec(&self, cancel: &CancellationToken, work: Work) -> Result<()> {
        let Work {
            kind,
            results,
            timeout_unit,
            ..
        } = work;

        match kind {
            WorkKind::Task(job) => self.exec_job_work(cancel, job, &results, timeout_unit).await,
            WorkKind::Pipeline { pipeline_id, jobs } => {
                self.exec_pipeline_work(cancel, pipeline_id, jobs, &results, timeout_unit)
                    .await
            }
        }
    }

    async fn exec_job_work(
        &self,
        cancel: &CancellationToken,
        mut job: Job,
        results: &ResultSender,
        timeout_unit: Duration,
    ) -> Result<()> {
        job.mark_started(Utc::now());
        self.storage.update_job(&job).await?;
        info!(job_id = %job.id, task = %job.task_name, "Job started");

        let result = self.run_job(cancel, &mut job, None, timeout_unit).await;
        let persisted = self.finish_job(&mut job).await;

        let _ = results.send(result).await;
        persisted
    }

    async fn exec_pipeline_work(
        &self,
        cancel: &CancellationToken,
        pipeline_id: Uuid,
        jobs: Vec<Job>,
        results: &ResultSender,
        timeout_unit: Duration,
    ) -> Result<()> {
        let mut pipeline = self.storage.get_pipeline(pipeline_id).await?;
        let last = jobs.len().saturating_sub(1);
        let mut previous: Option<Value> = None;

        for (index, mut job) in jobs.into_iter().enumerate() {
            let started_at = Utc::now();
            if index == 0 {
                pipeline.mark_started(started_at);
                self.storage.update_pipeline(&pipeline).await?;
                info!(pipeline_id = %pipeline.id, name = %pipeline.name, "Pipeline started");
            }

            job.mark_started(started_at);
            self.storage.update_job(&job).await?;
            info!(
                pipeline_id = %pipeline.id,
                job_id = %job.id,
                step = index,
                task = %job.task_name,
                "Pipeline job started"
            );

            let result = self
                .run_job(cancel, &mut job, previous.take(), timeout_unit)
                .await;
            let failed = !result.is_success();
            if failed {
                pipeline.mark_failed(Utc::now());
            } else if index == last {
                pipeline.mark_completed(Utc::now());
            }

            let job_persisted = self.finish_job(&mut job).await;
            let pipeline_persisted = if pipeline.status.is_terminal() {
                info!(pipeline_id = %pipeline.id, status = %pipeline.status, "Pipeline finished");
                self.storage.update_pipeline(&pipeline).await
            } else {
                Ok(())
            };

            previous = result.metadata.clone();
            let _ = results.send(result).await;
            job_persisted?;
            pipeline_persisted?;

            if failed {
                break;
            }
        }
        Ok(())
    }

    /// Runs the job's task under its deadline and marks the job terminal
    async fn run_job(
        &self,
        cancel: &CancellationToken,
        job: &mut Job,
        previous: Option<Value>,
        timeout_unit: Duration,
    ) -> JobResult {
        let deadline = deadline(job, timeout_unit);
        let (receiver, abort) = self.work(job, previous);

        let result = tokio::select! {
            received = receiver => received
                .unwrap_or_else(|_| JobResult::failure(job.id, "task result was dropped")),
            _ = tokio::time::sleep(deadline) => {
                abort.abort();
                JobResult::failure(job.id, format!("deadline exceeded after {deadline:?}"))
            }
            _ = cancel.cancelled() => {
                abort.abort();
                JobResult::failure(job.id, "execution cancelled")
            }
        };

        let finished_at = Utc::now();
        match &result.error {
            None => {
                job.mark_completed(finished_at);
                info!(job_id = %job.id, duration_ms = ?job.duration_ms, "Job completed");
            }
            Some(reason) => {
                job.mark_failed(finished_at, reason.clone());
                warn!(job_id = %job.id, reason = %reason, "Job failed");
            }
        }
        result
    }

    /// Persists a terminal job, re-arming it first when it recurs
    async fn finish_job(&self, job: &mut Job) -> Result<()> {
        if !job.interval_enabled() {
            self.storage.update_job(job).await?;
            return Ok(());
        }

        self.publish(JOB_TOPIC, &*job).await;
        self.record_transaction(job).await;

        if let Err(e) = self.storage.recycle_job(job).await {
            warn!(job_id = %job.id, "Failed to recycle job, parking it: {}", e);
            job.reset(None);
            self.storage.update_job(job).await?;
        } else {
            debug!(job_id = %job.id, run_at = ?job.run_at, "Job recycled");
        }
        Ok(())
    }

    async fn record_transaction(&self, job: &Job) {
        let transaction = Transaction::from_job(job);
        if let Err(e) = self.storage.create_transaction(&transaction).await {
            error!(job_id = %job.id, "Failed to store transaction: {}", e);
            return;
        }
        self.publish(TRANSACTION_TOPIC, &transaction).await;
    }

    async fn publish<T: serde::Serialize>(&self, topic: &str, message: &T) {
        let payload = match serde_json::to_value(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic, "Failed to encode message: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.publish(topic, payload).await {
            warn!(topic, "Failed to publish message: {}", e);
        }
    }

    /// Spawns the job's task and returns its single result
    ///
    /// The task runs on its own tokio task; a panic is reported as a failed
    /// result and the returned handle aborts the task.
    fn work(&self, job: &Job, previous: Option<Value>) -> (oneshot::Receiver<JobResult>, AbortHandle) {
        let (sender, receiver) = oneshot::channel();
        let job_id = job.id;
        let task_name = job.task_name.clone();
        let params = job.task_params.clone();
        let previous = previous.filter(|_| job.use_previous_results);
        let registry = Arc::clone(&self.registry);

        let task = tokio::spawn(async move {
            match registry.get_task_func(&task_name) {
                Ok(func) => func(params, previous).await,
                Err(e) => Err(e.into()),
            }
        });
        let abort = task.abort_handle();

        tokio::spawn(async move {
            let result = match task.await {
                Ok(Ok(Value::Null)) => JobResult::success(job_id, None),
                Ok(Ok(metadata)) => JobResult::success(job_id, Some(metadata)),
                Ok(Err(e)) => JobResult::failure(job_id, format!("{e:#}")),
                Err(e) if e.is_panic() => JobResult::failure(
                    job_id,
                    format!("task panicked: {}", panic_message(e.into_panic())),
                ),
                Err(_) => JobResult::failure(job_id, "task aborted"),
            };
            let _ = sender.send(result);
        });

        (receiver, abort)
    }
}

fn deadline(job: &Job, timeout_unit: Duration) -> Duration {
    if job.timeout == 0 {
        return DEFAULT_TIMEOUT;
    }
    timeout_unit.saturating_mul(u32::try_from(job.timeout).unwrap_or(u32::MAX))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
