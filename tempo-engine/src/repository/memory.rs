//! In-memory storage
//!
//! Records are kept as serialized JSON so that reads always hand out fresh
//! copies, the same way a networked backend would.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tempo_core::domain::job::{Job, JobResult, JobStatus};
use tempo_core::domain::pipeline::Pipeline;
use tempo_core::domain::transaction::Transaction;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

use super::storage::{Event, Storage, StorageError};

const EVENT_CAPACITY: usize = 256;

struct PipelineRecord {
    data: String,
    job_ids: Vec<Uuid>,
}

/// Storage backed by process memory
pub struct InMemoryStorage {
    jobs: RwLock<HashMap<Uuid, String>>,
    pipelines: RwLock<HashMap<Uuid, PipelineRecord>>,
    results: RwLock<HashMap<Uuid, String>>,
    transactions: RwLock<HashMap<Uuid, String>>,
    events: broadcast::Sender<Event>,
    closed: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: RwLock::new(HashMap::new()),
            pipelines: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            transactions: RwLock::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribes to every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl PipelineRecord {
    /// Decodes the pipeline and rebuilds its job snapshot in sequence order
    fn load(&self, jobs: &HashMap<Uuid, String>) -> Result<Pipeline, StorageError> {
        let mut pipeline: Pipeline = decode(&self.data)?;
        let mut snapshot = Vec::with_capacity(self.job_ids.len());
        for id in &self.job_ids {
            if let Some(data) = jobs.get(id) {
                snapshot.push(decode::<Job>(data)?);
            }
        }
        snapshot.sort_by_key(|job| job.sequence);
        pipeline.jobs = snapshot;
        Ok(pipeline)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, StorageError> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(data: &str) -> Result<T, StorageError> {
    Ok(serde_json::from_str(data)?)
}

fn decode_all<T: DeserializeOwned>(
    table: &HashMap<Uuid, String>,
) -> Result<Vec<T>, StorageError> {
    table.values().map(|data| decode(data)).collect()
}

fn matches_status(filter: JobStatus, status: JobStatus) -> bool {
    filter == JobStatus::Undefined || filter == status
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_job(&self, job: &Job) -> Result<(), StorageError> {
        self.ensure_open()?;
        let data = encode(job)?;
        self.jobs.write().await.insert(job.id, data);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Job, StorageError> {
        self.ensure_open()?;
        let jobs = self.jobs.read().await;
        let data = jobs
            .get(&id)
            .ok_or(StorageError::NotFound { resource: "job", id })?;
        decode(data)
    }

    async fn get_jobs(&self, status: JobStatus) -> Result<Vec<Job>, StorageError> {
        self.ensure_open()?;
        let mut jobs: Vec<Job> = decode_all(&*self.jobs.read().await)?;
        jobs.retain(|job| matches_status(status, job.status));
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn get_due_jobs(&self) -> Result<Vec<Job>, StorageError> {
        self.ensure_open()?;
        let now = Utc::now();
        let mut jobs: Vec<Job> = decode_all(&*self.jobs.read().await)?;
        jobs.retain(|job| {
            job.status == JobStatus::Pending && job.run_at.is_some_and(|run_at| run_at <= now)
        });
        jobs.sort_by_key(|job| (job.run_at, job.sequence));
        debug!(due = jobs.len(), "Loaded due jobs");
        Ok(jobs)
    }

    async fn update_job(&self, job: &Job) -> Result<(), StorageError> {
        self.ensure_open()?;
        let data = encode(job)?;
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(StorageError::NotFound {
                resource: "job",
                id: job.id,
            }),
        }
    }

    async fn delete_job(&self, id: Uuid) -> Result<(), StorageError> {
        self.ensure_open()?;
        if self.jobs.write().await.remove(&id).is_none() {
            return Err(StorageError::NotFound { resource: "job", id });
        }
        self.results.write().await.remove(&id);

        let mut transactions = self.transactions.write().await;
        let mut orphaned = Vec::new();
        for (tx_id, data) in transactions.iter() {
            let tx: Transaction = decode(data)?;
            if tx.job_id == id {
                orphaned.push(*tx_id);
            }
        }
        for tx_id in orphaned {
            transactions.remove(&tx_id);
        }
        Ok(())
    }

    async fn get_jobs_by_pipeline(&self, pipeline_id: Uuid) -> Result<Vec<Job>, StorageError> {
        self.ensure_open()?;
        let mut jobs: Vec<Job> = decode_all(&*self.jobs.read().await)?;
        jobs.retain(|job| job.pipeline_id == Some(pipeline_id));
        jobs.sort_by_key(|job| job.sequence);
        Ok(jobs)
    }

    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut record = pipeline.clone();
        let job_ids = record.jobs.iter().map(|job| job.id).collect();
        let job_data = record
            .jobs
            .drain(..)
            .map(|job| encode(&job).map(|data| (job.id, data)))
            .collect::<Result<Vec<_>, _>>()?;
        let data = encode(&record)?;

        let mut pipelines = self.pipelines.write().await;
        let mut jobs = self.jobs.write().await;
        jobs.extend(job_data);
        pipelines.insert(pipeline.id, PipelineRecord { data, job_ids });
        Ok(())
    }

    async fn get_pipeline(&self, id: Uuid) -> Result<Pipeline, StorageError> {
        self.ensure_open()?;
        let pipelines = self.pipelines.read().await;
        let record = pipelines.get(&id).ok_or(StorageError::NotFound {
            resource: "pipeline",
            id,
        })?;
        let jobs = self.jobs.read().await;
        record.load(&jobs)
    }

    async fn get_pipelines(&self, status: JobStatus) -> Result<Vec<Pipeline>, StorageError> {
        self.ensure_open()?;
        let pipelines = self.pipelines.read().await;
        let jobs = self.jobs.read().await;
        let mut loaded = Vec::with_capacity(pipelines.len());
        for record in pipelines.values() {
            let pipeline = record.load(&jobs)?;
            if matches_status(status, pipeline.status) {
                loaded.push(pipeline);
            }
        }
        loaded.sort_by_key(|pipeline| pipeline.created_at);
        Ok(loaded)
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut record = pipeline.clone();
        record.jobs.clear();
        let data = encode(&record)?;

        let mut pipelines = self.pipelines.write().await;
        match pipelines.get_mut(&pipeline.id) {
            Some(slot) => {
                slot.data = data;
                Ok(())
            }
            None => Err(StorageError::NotFound {
                resource: "pipeline",
                id: pipeline.id,
            }),
        }
    }

    async fn delete_pipeline(&self, id: Uuid) -> Result<(), StorageError> {
        self.ensure_open()?;
        let record = self
            .pipelines
            .write()
            .await
            .remove(&id)
            .ok_or(StorageError::NotFound {
                resource: "pipeline",
                id,
            })?;

        let mut jobs = self.jobs.write().await;
        let mut results = self.results.write().await;
        for job_id in &record.job_ids {
            jobs.remove(job_id);
            results.remove(job_id);
        }
        Ok(())
    }

    async fn create_job_result(&self, result: &JobResult) -> Result<(), StorageError> {
        self.ensure_open()?;
        let data = encode(result)?;
        self.results.write().await.insert(result.job_id, data);
        Ok(())
    }

    async fn get_job_result(&self, job_id: Uuid) -> Result<JobResult, StorageError> {
        self.ensure_open()?;
        let results = self.results.read().await;
        let data = results.get(&job_id).ok_or(StorageError::NotFound {
            resource: "job result",
            id: job_id,
        })?;
        decode(data)
    }

    async fn update_job_result(&self, result: &JobResult) -> Result<(), StorageError> {
        self.ensure_open()?;
        let data = encode(result)?;
        let mut results = self.results.write().await;
        match results.get_mut(&result.job_id) {
            Some(slot) => {
                *slot = data;
                Ok(())
            }
            None => Err(StorageError::NotFound {
                resource: "job result",
                id: result.job_id,
            }),
        }
    }

    async fn delete_job_result(&self, job_id: Uuid) -> Result<(), StorageError> {
        self.ensure_open()?;
        match self.results.write().await.remove(&job_id) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound {
                resource: "job result",
                id: job_id,
            }),
        }
    }

    async fn create_transaction(&self, transaction: &Transaction) -> Result<(), StorageError> {
        self.ensure_open()?;
        let data = encode(transaction)?;
        self.transactions
            .write()
            .await
            .insert(transaction.id, data);
        Ok(())
    }

    async fn get_transactions(&self, status: JobStatus) -> Result<Vec<Transaction>, StorageError> {
        self.ensure_open()?;
        let mut transactions: Vec<Transaction> = decode_all(&*self.transactions.read().await)?;
        transactions.retain(|tx| matches_status(status, tx.status));
        transactions.sort_by_key(|tx| tx.created_at);
        Ok(transactions)
    }

    async fn get_transactions_by_job(&self, job_id: Uuid) -> Result<Vec<Transaction>, StorageError> {
        self.ensure_open()?;
        let mut transactions: Vec<Transaction> = decode_all(&*self.transactions.read().await)?;
        transactions.retain(|tx| tx.job_id == job_id);
        transactions.sort_by_key(|tx| tx.created_at);
        Ok(transactions)
    }

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), StorageError> {
        self.ensure_open()?;
        let event = Event {
            topic: topic.to_string(),
            payload,
        };
        // No subscribers is not an error
        if self.events.send(event).is_err() {
            debug!(topic, "Published event without subscribers");
        }
        Ok(())
    }

    async fn check_health(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;
    use tempo_core::domain::job::TaskParams;

    fn job(name: &str) -> Job {
        Job::new(name, "noop", TaskParams::new())
    }

    fn pipeline(count: usize) -> Pipeline {
        let pipeline_id = Uuid::new_v4();
        let mut jobs: Vec<Job> = (0..count).map(|i| job(&format!("step-{i}"))).collect();
        for i in 0..count {
            jobs[i].pipeline_id = Some(pipeline_id);
            jobs[i].sequence = i as u32;
            if i + 1 < count {
                jobs[i].next_job_id = Some(jobs[i + 1].id);
            }
        }
        let mut pipeline = Pipeline::new("pipe", jobs);
        pipeline.id = pipeline_id;
        pipeline
    }

    #[tokio::test]
    async fn test_job_round_trip_preserves_fields() {
        let storage = InMemoryStorage::new();
        let mut job = job("a");
        job.task_params.insert("host".to_string(), json!("localhost"));
        job.run_at = Some(Utc::now());
        storage.create_job(&job).await.unwrap();

        let stored = storage.get_job(job.id).await.unwrap();
        assert_eq!(stored, job);
        assert!(stored.started_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_records_are_not_found() {
        let storage = InMemoryStorage::new();
        let err = storage.get_job(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());

        let err = storage.update_job(&job("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_status_filter() {
        let storage = InMemoryStorage::new();
        let pending = job("pending");
        let mut failed = job("failed");
        failed.status = JobStatus::Failed;
        storage.create_job(&pending).await.unwrap();
        storage.create_job(&failed).await.unwrap();

        assert_eq!(storage.get_jobs(JobStatus::Undefined).await.unwrap().len(), 2);
        let only_failed = storage.get_jobs(JobStatus::Failed).await.unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].id, failed.id);
    }

    #[tokio::test]
    async fn test_due_jobs_ordered_by_run_at_then_sequence() {
        let storage = InMemoryStorage::new();
        let at = Utc::now() - TimeDelta::seconds(5);

        let mut later = job("later");
        later.run_at = Some(at + TimeDelta::seconds(1));
        let mut second = job("second");
        second.run_at = Some(at);
        second.sequence = 1;
        let mut first = job("first");
        first.run_at = Some(at);
        let mut future = job("future");
        future.run_at = Some(Utc::now() + TimeDelta::hours(1));
        let mut scheduled = job("scheduled");
        scheduled.run_at = Some(at);
        scheduled.status = JobStatus::Scheduled;
        let unscheduled = job("unscheduled");

        for job in [&later, &second, &first, &future, &scheduled, &unscheduled] {
            storage.create_job(job).await.unwrap();
        }

        let due: Vec<_> = storage
            .get_due_jobs()
            .await
            .unwrap()
            .into_iter()
            .map(|job| job.name)
            .collect();
        assert_eq!(due, vec!["first", "second", "later"]);
    }

    #[tokio::test]
    async fn test_pipeline_snapshot_rebuilt_in_sequence() {
        let storage = InMemoryStorage::new();
        let pipeline = pipeline(3);
        storage.create_pipeline(&pipeline).await.unwrap();

        let stored = storage.get_pipeline(pipeline.id).await.unwrap();
        let ids: Vec<_> = stored.jobs.iter().map(|job| job.id).collect();
        let expected: Vec<_> = pipeline.jobs.iter().map(|job| job.id).collect();
        assert_eq!(ids, expected);

        let mut job = storage.get_job(expected[1]).await.unwrap();
        job.status = JobStatus::Completed;
        storage.update_job(&job).await.unwrap();
        let stored = storage.get_pipeline(pipeline.id).await.unwrap();
        assert_eq!(stored.jobs[1].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_delete_pipeline_cascades() {
        let storage = InMemoryStorage::new();
        let pipeline = pipeline(2);
        storage.create_pipeline(&pipeline).await.unwrap();
        let head = pipeline.jobs[0].id;
        storage
            .create_job_result(&JobResult::success(head, None))
            .await
            .unwrap();

        storage.delete_pipeline(pipeline.id).await.unwrap();

        assert!(storage.get_pipeline(pipeline.id).await.unwrap_err().is_not_found());
        assert!(storage.get_job(head).await.unwrap_err().is_not_found());
        assert!(storage.get_job_result(head).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_job_cascades_to_result_and_transactions() {
        let storage = InMemoryStorage::new();
        let job = job("a");
        storage.create_job(&job).await.unwrap();
        storage
            .create_job_result(&JobResult::failure(job.id, "boom"))
            .await
            .unwrap();
        storage
            .create_transaction(&Transaction::from_job(&job))
            .await
            .unwrap();

        storage.delete_job(job.id).await.unwrap();

        assert!(storage.get_job_result(job.id).await.unwrap_err().is_not_found());
        assert!(storage.get_transactions_by_job(job.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recycle_pipeline_persists_jobs() {
        let storage = InMemoryStorage::new();
        let mut pipeline = pipeline(2);
        pipeline.options.run_on_interval = Some("1 hour".to_string());
        storage.create_pipeline(&pipeline).await.unwrap();

        let mut stored = storage.get_pipeline(pipeline.id).await.unwrap();
        stored.status = JobStatus::Failed;
        storage.recycle_pipeline(&mut stored).await.unwrap();

        let reloaded = storage.get_pipeline(pipeline.id).await.unwrap();
        assert_eq!(reloaded.status, JobStatus::Pending);
        assert!(reloaded.jobs.iter().all(|job| job.run_at.is_some()));
        assert!(reloaded.jobs[0].run_at < reloaded.jobs[1].run_at);
    }

    #[tokio::test]
    async fn test_publish_fans_out() {
        let storage = InMemoryStorage::new();
        let mut events = storage.subscribe();
        storage.publish("job", json!({"id": 1})).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.topic, "job");
        assert_eq!(event.payload, json!({"id": 1}));
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_calls() {
        let storage = InMemoryStorage::new();
        assert!(storage.check_health().await);
        storage.close().await.unwrap();
        assert!(!storage.check_health().await);
        assert!(matches!(
            storage.create_job(&job("late")).await,
            Err(StorageError::Closed)
        ));
    }
}
