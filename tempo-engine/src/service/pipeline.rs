//! Pipeline Service
//!
//! Admission and management of pipelines.

use chrono::Utc;
use std::sync::Arc;
use tempo_core::domain::job::Job;
use tempo_core::domain::pipeline::Pipeline;
use tempo_core::dto::pipeline::{CreatePipeline, UpdatePipeline};
use tempo_core::error::ValidationError;
use tempo_core::schedule::parse_run_at;
use tracing::{info, warn};
use uuid::Uuid;

use super::{ServiceError, parse_status_filter};
use crate::queue::JobQueue;
use crate::repository::Storage;
use crate::tasks::TaskRegistry;

pub struct PipelineService {
    storage: Arc<dyn Storage>,
    job_queue: Arc<dyn JobQueue>,
    registry: Arc<dyn TaskRegistry>,
}

impl PipelineService {
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

    /// Builds, validates and stores a pipeline from its job list
    ///
    /// Jobs are linked in request order. Only the head gets a run time; the
    /// followers run inside the head's chain. Jobs without an interval of
    /// their own recur on the pipeline's interval.
    pub async fn create(&self, request: CreatePipeline) -> Result<Pipeline, ServiceError> {
        let now = Utc::now();
        let run_at = if request.run_now {
            None
        } else {
            let expression = request.run_at.unwrap_or_default();
            Some(
                parse_run_at(&expression, now)
                    .map_err(ValidationError::from)?
                    .unwrap_or(now),
            )
        };

        let pipeline_id = Uuid::new_v4();
        let mut jobs: Vec<Job> = request
            .jobs
            .into_iter()
            .enumerate()
            .map(|(index, step)| {
                let mut job = Job::new(step.name, step.task_name, step.task_params);
                job.description = step.description;
                job.timeout = step.timeout;
                job.use_previous_results = step.use_previous_results;
                job.options = step.options;
                if !job.interval_enabled() {
                    job.options.run_on_interval = request.options.run_on_interval.clone();
                }
                job.pipeline_id = Some(pipeline_id);
                job.sequence = index as u32;
                job
            })
            .collect();

        for index in 1..jobs.len() {
            let next = jobs[index].id;
            jobs[index - 1].next_job_id = Some(next);
        }
        if let Some(head) = jobs.first_mut() {
            head.run_at = run_at;
        }

        let mut pipeline = Pipeline::new(request.name, jobs);
        pipeline.id = pipeline_id;
        pipeline.description = request.description;
        pipeline.disable = request.disable;
        pipeline.options = request.options;
        pipeline.run_at = run_at;

        let task_names = self.registry.get_task_names();
        for job in &pipeline.jobs {
            job.validate(&task_names)?;
        }
        pipeline.validate()?;

        self.storage.create_pipeline(&pipeline).await?;

        if request.run_now {
            if let Some(head) = pipeline.jobs.first() {
                if let Err(e) = self.job_queue.push(head.clone()).await {
                    warn!(pipeline_id = %pipeline.id, "Could not queue pipeline: {}", e);
                    self.storage.delete_pipeline(pipeline.id).await?;
                    return Err(e.into());
                }
            }
        }

        info!(
            pipeline_id = %pipeline.id,
            name = %pipeline.name,
            jobs = pipeline.jobs.len(),
            "Pipeline created"
        );
        Ok(pipeline)
    }

    pub async fn get(&self, id: Uuid) -> Result<Pipeline, ServiceError> {
        let mut pipeline = self.storage.get_pipeline(id).await?;
        pipeline.set_duration();
        Ok(pipeline)
    }

    pub async fn list(&self, status_filter: Option<&str>) -> Result<Vec<Pipeline>, ServiceError> {
        let status = parse_status_filter(status_filter)?;
        Ok(self.storage.get_pipelines(status).await?)
    }

    /// Jobs of a pipeline in execution order
    pub async fn jobs(&self, id: Uuid) -> Result<Vec<Job>, ServiceError> {
        self.storage.get_pipeline(id).await?;
        let mut jobs = self.storage.get_jobs_by_pipeline(id).await?;
        for job in &mut jobs {
            job.set_duration();
        }
        Ok(jobs)
    }

    pub async fn update(&self, id: Uuid, request: UpdatePipeline) -> Result<Pipeline, ServiceError> {
        let mut pipeline = self.storage.get_pipeline(id).await?;
        if let Some(name) = request.name {
            pipeline.name = name;
        }
        if let Some(description) = request.description {
            pipeline.description = Some(description);
        }
        if let Some(disable) = request.disable {
            pipeline.disable = disable;
        }
        if let Some(options) = request.options {
            pipeline.options = options;
        }

        pipeline.validate()?;
        self.storage.update_pipeline(&pipeline).await?;
        info!(pipeline_id = %pipeline.id, "Pipeline updated");
        Ok(pipeline)
    }

    /// Deletes a pipeline together with its jobs and their results
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        self.storage.delete_pipeline(id).await?;
        info!(pipeline_id = %id, "Pipeline deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::FifoQueue;
    use crate::repository::InMemoryStorage;
    use crate::service::JobService;
    use crate::tasks::{InMemoryTaskRegistry, register_builtin};
    use tempo_core::domain::job::{JobOptions, JobStatus};
    use tempo_core::domain::pipeline::PipelineOptions;
    use tempo_core::dto::pipeline::CreatePipelineJob;

    struct Services {
        pipelines: PipelineService,
        jobs: JobService,
        storage: Arc<InMemoryStorage>,
        queue: Arc<FifoQueue>,
    }

    fn services() -> Services {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = Arc::new(FifoQueue::new(1));
        let mut registry = InMemoryTaskRegistry::new();
        register_builtin(&mut registry);
        let registry = Arc::new(registry);
        Services {
            pipelines: PipelineService::new(storage.clone(), queue.clone(), registry.clone()),
            jobs: JobService::new(storage.clone(), queue.clone(), registry),
            storage,
            queue,
        }
    }

    fn step(name: &str, task: &str) -> CreatePipelineJob {
        CreatePipelineJob {
            name: name.to_string(),
            task_name: task.to_string(),
            ..Default::default()
        }
    }

    fn request(steps: Vec<CreatePipelineJob>) -> CreatePipeline {
        CreatePipeline {
            name: "nightly".to_string(),
            jobs: steps,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_links_jobs() {
        let s = services();
        let mut req = request(vec![
            step("fetch", "noop"),
            step("transform", "echo"),
            CreatePipelineJob {
                options: JobOptions {
                    run_on_interval: Some("1 day".to_string()),
                    on_error_retry: false,
                },
                ..step("publish", "noop")
            },
        ]);
        req.run_at = Some("10 min".to_string());
        req.options = PipelineOptions {
            run_on_interval: Some("1 hour".to_string()),
            ..Default::default()
        };

        let pipeline = s.pipelines.create(req).await.unwrap();
        let jobs = s.pipelines.jobs(pipeline.id).await.unwrap();

        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].next_job_id, Some(jobs[1].id));
        assert_eq!(jobs[1].next_job_id, Some(jobs[2].id));
        assert_eq!(jobs[2].next_job_id, None);
        assert!(jobs.iter().enumerate().all(|(i, job)| job.sequence == i as u32));

        assert!(jobs[0].run_at.is_some());
        assert!(jobs[1].run_at.is_none());
        assert_eq!(pipeline.run_at, jobs[0].run_at);

        assert_eq!(jobs[0].options.run_on_interval.as_deref(), Some("1 hour"));
        assert_eq!(jobs[2].options.run_on_interval.as_deref(), Some("1 day"));
    }

    #[tokio::test]
    async fn test_create_rejects_single_job() {
        let s = services();
        let err = s
            .pipelines
            .create(request(vec![step("only", "noop")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::TooFewJobs(1))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_task() {
        let s = services();
        let err = s
            .pipelines
            .create(request(vec![step("a", "noop"), step("b", "teleport")]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Validation(ValidationError::UnknownTask { .. })
        ));
        assert!(s.storage.get_pipelines(JobStatus::Undefined).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_now_queues_the_head() {
        let s = services();
        let mut req = request(vec![step("a", "noop"), step("b", "noop")]);
        req.run_now = true;
        let pipeline = s.pipelines.create(req).await.unwrap();

        let queued = s.queue.pop().await.unwrap();
        assert_eq!(queued.id, pipeline.jobs[0].id);
    }

    #[tokio::test]
    async fn test_pipeline_jobs_cannot_be_deleted_alone() {
        let s = services();
        let pipeline = s
            .pipelines
            .create(request(vec![step("a", "noop"), step("b", "noop")]))
            .await
            .unwrap();
        let head = pipeline.jobs[0].id;

        let err = s.jobs.delete(head).await.unwrap_err();
        assert!(matches!(err, ServiceError::PipelineJob(id) if id == head));

        s.pipelines.delete(pipeline.id).await.unwrap();
        assert!(s.jobs.get(head).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_and_list() {
        let s = services();
        let pipeline = s
            .pipelines
            .create(request(vec![step("a", "noop"), step("b", "noop")]))
            .await
            .unwrap();

        let updated = s
            .pipelines
            .update(
                pipeline.id,
                UpdatePipeline {
                    disable: Some(true),
                    name: Some("weekly".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.disable);
        assert_eq!(s.pipelines.get(pipeline.id).await.unwrap().name, "weekly");

        assert_eq!(s.pipelines.list(Some("PENDING")).await.unwrap().len(), 1);
        assert!(s.pipelines.list(Some("failed")).await.unwrap().is_empty());
    }
}
