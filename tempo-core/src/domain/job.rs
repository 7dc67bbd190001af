//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ScheduleError, ValidationError};
use crate::schedule::Interval;

/// Parameters handed to a task function
pub type TaskParams = HashMap<String, serde_json::Value>;

/// A single schedulable unit of task execution
///
/// Pipeline linkage is persisted through `next_job_id`. The `next` field is a
/// transient adjacency that the scheduler fills in from storage right before
/// handing a chain to the worker pool; it is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub disable: bool,

    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub fail_count: u32,

    #[serde(default)]
    pub options: JobOptions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_job_id: Option<Uuid>,
    /// Position inside the owning pipeline (0 for standalone jobs)
    #[serde(default)]
    pub sequence: u32,
    #[serde(default)]
    pub use_previous_results: bool,

    #[serde(skip)]
    pub next: Option<Box<Job>>,

    pub task_name: String,
    #[serde(default)]
    pub task_params: TaskParams,
    /// Timeout in timeout units, 0 means the engine default
    #[serde(default)]
    pub timeout: u64,

    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    pub run_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Milliseconds between start and completion
    pub duration_ms: Option<f64>,
}

/// Recurrence options of a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Interval expression (e.g. "15 sec"); recurrence is enabled when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_on_interval: Option<String>,
    #[serde(default)]
    pub on_error_retry: bool,
}

impl Job {
    /// Creates a new pending job
    pub fn new(name: impl Into<String>, task_name: impl Into<String>, task_params: TaskParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            disable: false,
            run_count: 0,
            fail_count: 0,
            options: JobOptions::default(),
            pipeline_id: None,
            next_job_id: None,
            sequence: 0,
            use_previous_results: false,
            next: None,
            task_name: task_name.into(),
            task_params,
            timeout: 0,
            status: JobStatus::Pending,
            failure_reason: None,
            run_at: None,
            scheduled_at: None,
            created_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn mark_pending(&mut self) {
        self.status = JobStatus::Pending;
    }

    /// Updates the status and timestamp at the moment the job got scheduled
    pub fn mark_scheduled(&mut self, scheduled_at: DateTime<Utc>) {
        self.status = JobStatus::Scheduled;
        self.scheduled_at = Some(scheduled_at);
    }

    /// Updates the status and timestamp at the moment the job started
    pub fn mark_started(&mut self, started_at: DateTime<Utc>) {
        self.status = JobStatus::InProgress;
        self.started_at = Some(started_at);
        self.failure_reason = None;
    }

    /// Updates the status and timestamp at the moment the job finished
    pub fn mark_completed(&mut self, completed_at: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(completed_at);
        self.set_duration();
    }

    /// Updates the status, timestamp and reason at the moment the job failed
    pub fn mark_failed(&mut self, failed_at: DateTime<Utc>, reason: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.completed_at = Some(failed_at);
        self.set_duration();
    }

    /// Sets the duration of the job if it's completed or failed
    pub fn set_duration(&mut self) {
        if !self.status.is_terminal() {
            return;
        }
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            self.duration_ms = Some(millis_between(started, completed));
        }
    }

    /// Performs basic sanity checks against the registered task names
    pub fn validate(&self, task_names: &[String]) -> Result<(), ValidationError> {
        let mut required = Vec::new();
        if self.name.trim().is_empty() {
            required.push("name");
        }
        if self.task_name.trim().is_empty() {
            required.push("task_name");
        }
        if !required.is_empty() {
            return Err(ValidationError::MissingFields(required));
        }

        if !task_names.iter().any(|name| name == &self.task_name) {
            let mut valid = task_names.to_vec();
            valid.sort();
            return Err(ValidationError::UnknownTask {
                name: self.task_name.clone(),
                valid,
            });
        }

        if self.status != JobStatus::Undefined {
            self.status.validate()?;
        }

        if let Some(expression) = self.options.run_on_interval.as_deref() {
            if !expression.trim().is_empty() {
                expression.parse::<Interval>()?;
            }
        }

        Ok(())
    }

    pub fn is_scheduled(&self) -> bool {
        self.run_at.is_some()
    }

    pub fn has_next(&self) -> bool {
        self.next_job_id.is_some()
    }

    pub fn belongs_to_pipeline(&self) -> bool {
        self.pipeline_id.is_some()
    }

    /// Parsed recurrence interval, `None` when recurrence is disabled
    pub fn interval(&self) -> Result<Option<Interval>, ScheduleError> {
        match self.options.run_on_interval.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(expression) => expression.parse().map(Some),
        }
    }

    pub fn interval_enabled(&self) -> bool {
        self.options
            .run_on_interval
            .as_deref()
            .is_some_and(|expression| !expression.trim().is_empty())
    }

    /// Re-arms a finished job for its next run
    ///
    /// The next run is computed from the completion time (or `now` if the job
    /// never completed). The job goes back to `Pending` with every execution
    /// timestamp cleared.
    pub fn recycle(&mut self, interval: &Interval, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let next_run_at = interval.adjust(self.completed_at.unwrap_or(now))?;

        match self.status {
            JobStatus::Completed => self.run_count += 1,
            JobStatus::Failed => {
                self.run_count += 1;
                self.fail_count += 1;
            }
            _ => {}
        }

        self.reset(Some(next_run_at));
        Ok(())
    }

    /// Puts the job back to `Pending` with the given run time
    pub fn reset(&mut self, run_at: Option<DateTime<Utc>>) {
        self.status = JobStatus::Pending;
        self.run_at = run_at;
        self.scheduled_at = None;
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
    }

    /// Flattens a linked chain into execution order, detaching `next`
    pub fn into_chain(mut self) -> Vec<Job> {
        let mut chain = Vec::new();
        let mut next = self.next.take();
        chain.push(self);
        while let Some(mut job) = next {
            next = job.next.take();
            chain.push(*job);
        }
        chain
    }

    /// Links jobs given in execution order into one chain, the inverse of
    /// [`Job::into_chain`]
    pub fn link_chain(jobs: Vec<Job>) -> Option<Job> {
        let mut next: Option<Job> = None;
        for mut job in jobs.into_iter().rev() {
            job.next = next.map(Box::new);
            next = Some(job);
        }
        next
    }
}

/// Job execution status
///
/// `Undefined` is reserved for "no filter" queries and is never valid for a
/// persisted job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[default]
    #[serde(rename = "UNDEFINED")]
    Undefined = 0,
    #[serde(rename = "PENDING")]
    Pending = 1,
    #[serde(rename = "SCHEDULED")]
    Scheduled = 2,
    #[serde(rename = "IN_PROGRESS")]
    InProgress = 3,
    #[serde(rename = "COMPLETED")]
    Completed = 4,
    #[serde(rename = "FAILED")]
    Failed = 5,
}

impl JobStatus {
    /// Integer representation of the status
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Rejects statuses that may not be persisted
    pub fn validate(self) -> Result<(), ValidationError> {
        match self {
            JobStatus::Undefined => Err(ValidationError::InvalidStatus(self.to_string())),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Undefined => "UNDEFINED",
            JobStatus::Pending => "PENDING",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(JobStatus::Pending),
            "SCHEDULED" => Ok(JobStatus::Scheduled),
            "IN_PROGRESS" | "INPROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(ValidationError::InvalidStatus(s.to_string())),
        }
    }
}

/// Result of a job execution
///
/// Produced exactly once per execution; `error` is `None` on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn success(job_id: Uuid, metadata: Option<serde_json::Value>) -> Self {
        Self {
            job_id,
            metadata,
            error: None,
        }
    }

    pub fn failure(job_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            job_id,
            metadata: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub(crate) fn millis_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let elapsed = end.signed_duration_since(start);
    match elapsed.num_microseconds() {
        Some(micros) => micros as f64 / 1_000.0,
        None => elapsed.num_milliseconds() as f64,
    }
}
