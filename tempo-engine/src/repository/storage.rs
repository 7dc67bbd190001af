//! Storage capability
//!
//! Every entity the engine touches goes through this trait: jobs, pipelines,
//! job results and audit transactions, plus a small publish hook used to fan
//! out execution events.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempo_core::domain::job::{Job, JobResult, JobStatus};
use tempo_core::domain::pipeline::Pipeline;
use tempo_core::domain::transaction::Transaction;
use tempo_core::error::ScheduleError;
use thiserror::Error;
use uuid::Uuid;

/// Topic carrying recurring jobs right after they finished a run
pub const JOB_TOPIC: &str = "job";

/// Topic carrying audit transactions
pub const TRANSACTION_TOPIC: &str = "transaction";

/// A message published on a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: Uuid },

    #[error("failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Persistence capability used by the services, the scheduler and the workers
///
/// `JobStatus::Undefined` passed as a status filter means "no filter". Lists
/// are ordered by `created_at` ascending.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<(), StorageError>;
    async fn get_job(&self, id: Uuid) -> Result<Job, StorageError>;
    async fn get_jobs(&self, status: JobStatus) -> Result<Vec<Job>, StorageError>;

    /// Pending jobs whose `run_at` has passed, ordered by `(run_at, sequence)`
    async fn get_due_jobs(&self) -> Result<Vec<Job>, StorageError>;

    async fn update_job(&self, job: &Job) -> Result<(), StorageError>;

    /// Deletes a job together with its result and transactions
    async fn delete_job(&self, id: Uuid) -> Result<(), StorageError>;

    /// Jobs of a pipeline ordered by `sequence`
    async fn get_jobs_by_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<Job>, StorageError>;

    /// Stores the pipeline and every job of its snapshot
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<(), StorageError>;
    async fn get_pipeline(&self, id: Uuid) -> Result<Pipeline, StorageError>;
    async fn get_pipelines(&self, status: JobStatus) -> Result<Vec<Pipeline>, StorageError>;

    /// Updates the pipeline record; its jobs are persisted separately
    async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<(), StorageError>;

    /// Deletes a pipeline, its jobs and their results
    async fn delete_pipeline(&self, id: Uuid) -> Result<(), StorageError>;

    async fn create_job_result(&self, result: &JobResult) -> Result<(), StorageError>;
    async fn get_job_result(&self, job_id: Uuid) -> Result<JobResult, StorageError>;
    async fn update_job_result(&self, result: &JobResult) -> Result<(), StorageError>;
    async fn delete_job_result(&self, job_id: Uuid) -> Result<(), StorageError>;

    async fn create_transaction(&self, transaction: &Transaction) -> Result<(), StorageError>;
    async fn get_transactions(&self, status: JobStatus) -> Result<Vec<Transaction>, StorageError>;
    async fn get_transactions_by_job(&self, job_id: Uuid) -> Result<Vec<Transaction>, StorageError>;

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), StorageError>;

    async fn check_health(&self) -> bool;
    async fn close(&self) -> Result<(), StorageError>;

    /// Re-arms a finished job on its own interval and persists it
    ///
    /// A job without an interval is parked as `Pending` with no run time.
    async fn recycle_job(&self, job: &mut Job) -> Result<(), StorageError> {
        match job.interval()? {
            Some(interval) => job.recycle(&interval, Utc::now())?,
            None => job.reset(None),
        }
        self.update_job(job).await
    }

    /// Re-arms a pipeline with all of its jobs and persists them
    async fn recycle_pipeline(&self, pipeline: &mut Pipeline) -> Result<(), StorageError> {
        pipeline.recycle(Utc::now())?;
        for job in &pipeline.jobs {
            self.update_job(job).await?;
        }
        self.update_pipeline(pipeline).await
    }
}
