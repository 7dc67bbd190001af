//! Pipeline domain types

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{Job, JobStatus, millis_between};
use crate::error::{ScheduleError, ValidationError};
use crate::schedule::{Interval, IntervalUnit};

/// An ordered chain of jobs executed sequentially
///
/// `jobs` is a snapshot taken from storage, not a set of live references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub options: PipelineOptions,
    #[serde(default)]
    pub jobs: Vec<Job>,
    pub status: JobStatus,
    pub run_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
}

/// Pipeline-wide recurrence and failure options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_on_interval: Option<String>,
    /// Stagger between consecutive jobs on re-arm, in seconds
    #[serde(default)]
    pub delay_between_task: u64,
    #[serde(default)]
    pub cancel_on_failure: bool,
}

impl Pipeline {
    /// Creates a new pending pipeline over already-linked jobs
    pub fn new(name: impl Into<String>, jobs: Vec<Job>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            disable: false,
            options: PipelineOptions::default(),
            jobs,
            status: JobStatus::Pending,
            run_at: None,
            created_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn mark_started(&mut self, started_at: DateTime<Utc>) {
        self.status = JobStatus::InProgress;
        self.started_at = Some(started_at);
    }

    pub fn mark_completed(&mut self, completed_at: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(completed_at);
        self.set_duration();
    }

    pub fn mark_failed(&mut self, failed_at: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(failed_at);
        self.set_duration();
    }

    /// Sets the duration of the pipeline if it's completed or failed
    pub fn set_duration(&mut self) {
        if !self.status.is_terminal() {
            return;
        }
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            self.duration_ms = Some(millis_between(started, completed));
        }
    }

    /// Performs basic sanity checks on the pipeline and its linkage
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut required = Vec::new();
        if self.name.trim().is_empty() {
            required.push("name");
        }
        if self.jobs.is_empty() {
            required.push("jobs");
        }
        if !required.is_empty() {
            return Err(ValidationError::MissingFields(required));
        }

        if self.jobs.len() < 2 {
            return Err(ValidationError::TooFewJobs(self.jobs.len()));
        }

        for (index, pair) in self.jobs.windows(2).enumerate() {
            if pair[0].next_job_id != Some(pair[1].id) {
                return Err(ValidationError::BrokenLink { index });
            }
        }
        if self.jobs.last().is_some_and(Job::has_next) {
            return Err(ValidationError::BrokenLink {
                index: self.jobs.len() - 1,
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

    /// Id of the first job in the chain
    pub fn head_id(&self) -> Option<Uuid> {
        self.jobs.first().map(|job| job.id)
    }

    /// Parsed recurrence interval, `None` when recurrence is disabled
    pub fn interval(&self) -> Result<Option<Interval>, ScheduleError> {
        match self.options.run_on_interval.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(expression) => expression.parse().map(Some),
        }
    }

    /// Attaches the transient `next` adjacency over the jobs
    ///
    /// Each job receives a boxed copy of the chain that follows it, so any
    /// job can be handed to the engine as a runnable chain.
    pub fn merge_jobs_in_one(&mut self) {
        for i in (0..self.jobs.len().saturating_sub(1)).rev() {
            let next = self.jobs[i + 1].clone();
            self.jobs[i].next = Some(Box::new(next));
        }
    }

    /// Detaches the transient `next` adjacency
    pub fn unmerge_jobs(&mut self) {
        for job in &mut self.jobs {
            job.next = None;
        }
    }

    /// Re-arms the pipeline and every one of its jobs
    ///
    /// Job `i` runs at `interval(now) + i * delay_between_task`; the jobs keep
    /// their `sequence`, which breaks ties in due scans. Without an interval
    /// the pipeline is re-armed one second out.
    pub fn recycle(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let interval = self
            .interval()?
            .unwrap_or(Interval::new(1, IntervalUnit::Second));
        let base = interval.adjust(now)?;
        let delay = self.options.delay_between_task.max(1);

        for (index, job) in self.jobs.iter_mut().enumerate() {
            let stagger = TimeDelta::try_seconds((delay * index as u64) as i64)
                .ok_or_else(|| ScheduleError::OutOfRange(format!("{delay} sec")))?;
            job.reset(Some(base + stagger));
        }

        self.status = JobStatus::Pending;
        self.run_at = self.jobs.first().and_then(|job| job.run_at);
        self.started_at = None;
        self.completed_at = None;
        self.duration_ms = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::TaskParams;
    use chrono::TimeZone;

    fn linked_pipeline(count: usize) -> Pipeline {
        let mut jobs: Vec<Job> = (0..count)
            .map(|i| Job::new(format!("job-{i}"), "noop", TaskParams::new()))
            .collect();
        let pipeline_id = Uuid::new_v4();
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

    #[test]
    fn test_validate_requires_two_jobs() {
        let pipeline = linked_pipeline(1);
        assert_eq!(pipeline.validate(), Err(ValidationError::TooFewJobs(1)));

        let empty = Pipeline::new("", vec![]);
        assert_eq!(
            empty.validate(),
            Err(ValidationError::MissingFields(vec!["name", "jobs"]))
        );

        assert!(linked_pipeline(3).validate().is_ok());
    }

    #[test]
    fn test_validate_detects_broken_link() {
        let mut pipeline = linked_pipeline(3);
        pipeline.jobs[1].next_job_id = None;
        assert_eq!(
            pipeline.validate(),
            Err(ValidationError::BrokenLink { index: 1 })
        );
    }

    #[test]
    fn test_merge_and_unmerge() {
        let mut pipeline = linked_pipeline(3);
        pipeline.merge_jobs_in_one();

        let head = pipeline.jobs[0].clone();
        let chain: Vec<_> = head.into_chain().into_iter().map(|j| j.id).collect();
        let expected: Vec<_> = pipeline.jobs.iter().map(|j| j.id).collect();
        assert_eq!(chain, expected);

        pipeline.unmerge_jobs();
        assert!(pipeline.jobs.iter().all(|j| j.next.is_none()));
    }

    #[test]
    fn test_recycle_staggers_jobs() {
        let mut pipeline = linked_pipeline(3);
        pipeline.options.run_on_interval = Some("1 min".to_string());
        pipeline.options.delay_between_task = 10;
        pipeline.status = JobStatus::Failed;
        for job in &mut pipeline.jobs {
            job.status = JobStatus::Completed;
        }

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        pipeline.recycle(now).unwrap();

        let base = now + TimeDelta::minutes(1);
        assert_eq!(pipeline.status, JobStatus::Pending);
        assert_eq!(pipeline.run_at, Some(base));
        for (i, job) in pipeline.jobs.iter().enumerate() {
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.run_at, Some(base + TimeDelta::seconds(10 * i as i64)));
            assert_eq!(job.sequence, i as u32);
        }
    }

    #[test]
    fn test_recycle_without_interval_rearms_one_second_out() {
        let mut pipeline = linked_pipeline(2);
        pipeline.jobs[0].run_at = Some(Utc::now());
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        pipeline.recycle(now).unwrap();

        let base = now + TimeDelta::seconds(1);
        assert_eq!(pipeline.run_at, Some(base));
        assert_eq!(pipeline.jobs[0].run_at, Some(base));
        assert_eq!(pipeline.jobs[1].run_at, Some(base + TimeDelta::seconds(1)));
    }
}
