//! Job Service
//!
//! Admission and management of standalone jobs.

use chrono::Utc;
use std::sync::Arc;
use tempo_core::domain::job::{Job, JobStatus};
use tempo_core::dto::job::{CreateJob, UpdateJob};
use tempo_core::error::ValidationError;
use tempo_core::schedule::parse_run_at;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ServiceError, parse_status_filter};
use crate::queue::JobQueue;
use crate::repository::Storage;
use crate::tasks::TaskRegistry;

pub struct JobService {
    storage: Arc<dyn Storage>,
    job_queue: Arc<dyn JobQueue>,
    registry: Arc<dyn TaskRegistry>,
}

impl JobService {
    pub fn new(
        storage: Arc<dyn Storage>,
        job_queue: Arc<dyn JobQueue>,
        registry: Arc<dyn TaskRegistry>,
    ) -> Self {
        Self {
            storage,
            job_queue,
            registry,
        }
    }

    /// Validates and stores a new job
    ///
    /// A `run_now` job skips the due scan and goes straight to the job
    /// queue; when the queue is full the job is not kept.
    pub async fn create(&self, request: CreateJob) -> Result<Job, ServiceError> {
        let now = Utc::now();
        let mut job = Job::new(request.name, request.task_name, request.task_params);
        job.description = request.description;
        job.timeout = request.timeout;
        job.disable = request.disable;
        job.options = request.options;
        job.run_at = if request.run_now {
            None
        } else {
            let expression = request.run_at.unwrap_or_default();
            Some(
                parse_run_at(&expression, now)
                    .map_err(ValidationError::from)?
                    .unwrap_or(now),
            )
        };

        job.validate(&self.registry.get_task_names())?;
        self.storage.create_job(&job).await?;

        if request.run_now {
            if let Err(e) = self.job_queue.push(job.clone()).await {
                warn!(job_id = %job.id, "Could not queue job: {}", e);
                self.storage.delete_job(job.id).await?;
                return Err(e.into());
            }
        }

        info!(job_id = %job.id, name = %job.name, run_at = ?job.run_at, "Job created");
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> Result<Job, ServiceError> {
        let mut job = self.storage.get_job(id).await?;
        job.set_duration();
        Ok(job)
    }

    /// Lists jobs, optionally filtered by a status name such as "failed"
    pub async fn list(&self, status_filter: Option<&str>) -> Result<Vec<Job>, ServiceError> {
        let status = parse_status_filter(status_filter)?;
        let mut jobs = self.storage.get_jobs(status).await?;
        for job in &mut jobs {
            job.set_duration();
        }
        Ok(jobs)
    }

    pub async fn update(&self, id: Uuid, request: UpdateJob) -> Result<Job, ServiceError> {
        let mut job = self.storage.get_job(id).await?;
        if let Some(name) = request.name {
            job.name = name;
        }
        if let Some(description) = request.description {
            job.description = Some(description);
        }
        if let Some(disable) = request.disable {
            job.disable = disable;
        }
        if let Some(options) = request.options {
            job.options = options;
        }

        job.validate(&self.registry.get_task_names())?;
        self.storage.update_job(&job).await?;
        info!(job_id = %job.id, "Job updated");
        Ok(job)
    }

    /// Deletes a standalone job; pipeline jobs go with their pipeline
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let job = self.storage.get_job(id).await?;
        if job.belongs_to_pipeline() {
            return Err(ServiceError::PipelineJob(id));
        }
        self.storage.delete_job(id).await?;
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// Deletes every standalone job, returning how many were removed
    pub async fn drop_all(&self) -> Result<usize, ServiceError> {
        let jobs = self.storage.get_jobs(JobStatus::Undefined).await?;
        let mut deleted = 0;
        for job in jobs.iter().filter(|job| !job.belongs_to_pipeline()) {
            self.storage.delete_job(job.id).await?;
            deleted += 1;
        }
        info!(deleted, "Dropped standalone jobs");
        Ok(deleted)
    }
}
