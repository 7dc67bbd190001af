//! Service layer
//!
//! Services validate and admit jobs and pipelines, and expose read access to
//! results and transactions. They only talk to the engine through storage
//! and the job queue.

mod job;
mod pipeline;
mod result;
mod transaction;

pub use job::JobService;
pub use pipeline::PipelineService;
pub use result::ResultService;
pub use transaction::TransactionService;

use tempo_core::domain::job::JobStatus;
use tempo_core::error::ValidationError;
use thiserror::Error;
use uuid::Uuid;

use crate::queue::QueueError;
use crate::repository::StorageError;

/// Service error type
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("job queue is full (capacity {capacity}), try again later")]
    QueueFull { capacity: usize },

    #[error("job queue is closed")]
    QueueClosed,

    #[error("job {0} belongs to a pipeline, delete the pipeline instead")]
    PipelineJob(Uuid),
}

impl From<QueueError> for ServiceError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full { capacity } => ServiceError::QueueFull { capacity },
            QueueError::Closed => ServiceError::QueueClosed,
        }
    }
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Storage(e) if e.is_not_found())
    }
}

/// Parses an optional status filter, `None` meaning every status
pub(crate) fn parse_status_filter(filter: Option<&str>) -> Result<JobStatus, ValidationError> {
    match filter.map(str::trim) {
        None | Some("") => Ok(JobStatus::Undefined),
        Some(status) => status.parse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_filter() {
        assert_eq!(parse_status_filter(None).unwrap(), JobStatus::Undefined);
        assert_eq!(parse_status_filter(Some("")).unwrap(), JobStatus::Undefined);
        assert_eq!(
            parse_status_filter(Some("failed")).unwrap(),
            JobStatus::Failed
        );
        assert!(matches!(
            parse_status_filter(Some("lost")),
            Err(ValidationError::InvalidStatus(_))
        ));
    }

    #[test]
    fn test_queue_errors_map_to_service_errors() {
        assert!(matches!(
            ServiceError::from(QueueError::Full { capacity: 3 }),
            ServiceError::QueueFull { capacity: 3 }
        ));
        assert!(matches!(
            ServiceError::from(QueueError::Closed),
            ServiceError::QueueClosed
        ));
    }
}
