//! Engine error type

use thiserror::Error;

use crate::repository::StorageError;

/// Errors raised by the worker pool and the scheduler loops
#[derive(Debug, Error)]
pub enum EngineError {
    /// The pool no longer accepts work
    #[error("worker pool is stopped")]
    PoolStopped,

    /// A pipeline job was handed over without its pipeline id
    #[error("job {0} is not part of a pipeline")]
    NotAPipeline(uuid::Uuid),

    /// Following `next_job_id` from the head does not cover the pipeline
    #[error("pipeline {0} has a broken job chain")]
    BrokenChain(uuid::Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
