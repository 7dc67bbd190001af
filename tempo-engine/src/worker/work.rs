//! Execution envelope handed to the worker pool

use std::time::Duration;
use tempo_core::domain::job::{Job, JobResult};
use tokio::sync::mpsc;
use uuid::Uuid;

/// What a [`Work`] item executes
#[derive(Debug)]
pub enum WorkKind {
    /// A single standalone job
    Task(Job),
    /// The ordered chain of a pipeline, starting at its head
    Pipeline { pipeline_id: Uuid, jobs: Vec<Job> },
}

impl WorkKind {
    pub fn len(&self) -> usize {
        match self {
            WorkKind::Task(_) => 1,
            WorkKind::Pipeline { jobs, .. } => jobs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn head(&self) -> Option<&Job> {
        match self {
            WorkKind::Task(job) => Some(job),
            WorkKind::Pipeline { jobs, .. } => jobs.first(),
        }
    }
}

/// A unit of work plus the channel its results are sent on
///
/// The channel holds one slot per job so a worker never blocks on it. It is
/// closed as soon as the `Work` is consumed and dropped.
#[derive(Debug)]
pub struct Work {
    pub(crate) kind: WorkKind,
    pub(crate) results: mpsc::Sender<JobResult>,
    receiver: Option<mpsc::Receiver<JobResult>>,
    pub(crate) timeout_unit: Duration,
}

impl Work {
    pub(crate) fn new(kind: WorkKind, timeout_unit: Duration) -> Self {
        let (results, receiver) = mpsc::channel(kind.len().max(1));
        Self {
            kind,
            results,
            receiver: Some(receiver),
            timeout_unit,
        }
    }

    pub fn kind(&self) -> &WorkKind {
        &self.kind
    }

    pub fn timeout_unit(&self) -> Duration {
        self.timeout_unit
    }

    /// Takes the receiving end of the result channel
    ///
    /// The pool persists results only if the receiver is still attached
    /// when the work is dispatched.
    pub fn take_results(&mut self) -> Option<mpsc::Receiver<JobResult>> {
        self.receiver.take()
    }
}
