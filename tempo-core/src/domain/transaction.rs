//! Audit records of job executions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{Job, JobStatus};

/// Snapshot of a single finished execution of a recurring job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub job_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<Uuid>,
    pub task_name: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
}

impl Transaction {
    /// Captures the execution state of `job` before it is recycled
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            pipeline_id: job.pipeline_id,
            task_name: job.task_name.clone(),
            status: job.status,
            failure_reason: job.failure_reason.clone(),
            created_at: Utc::now(),
            started_at: job.started_at,
            completed_at: job.completed_at,
            duration_ms: job.duration_ms,
        }
    }
}
