//! Error types for admission-time checks

use thiserror::Error;

/// Errors raised while validating a job or pipeline before it is stored
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// One or more required fields are empty
    #[error("{} required", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// The task name is not present in the registry
    #[error("{name} is not a valid task name - valid tasks: {}", .valid.join(", "))]
    UnknownTask { name: String, valid: Vec<String> },

    /// A pipeline needs at least two jobs
    #[error("pipeline should have at least 2 jobs, {0} given")]
    TooFewJobs(usize),

    /// Job `index` does not point at the job following it
    #[error("pipeline job at index {index} is not linked to its successor")]
    BrokenLink { index: usize },

    /// Status outside of the persisted range
    #[error("{0} is not a valid job status, valid statuses: PENDING, SCHEDULED, IN_PROGRESS, COMPLETED, FAILED")]
    InvalidStatus(String),

    /// The schedule expression could not be understood
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

/// Errors raised by the interval and run-at grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid interval '{0}': expected '<integer> <unit>' with unit one of sec, min, hour, day, week, month")]
    InvalidInterval(String),

    #[error("invalid run_at '{0}': expected an RFC 3339 timestamp or an interval such as '15 sec'")]
    InvalidRunAt(String),

    #[error("interval '{0}' overflows the supported date range")]
    OutOfRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_message() {
        let err = ValidationError::MissingFields(vec!["name", "task_name"]);
        assert_eq!(err.to_string(), "name, task_name required");
    }

    #[test]
    fn test_unknown_task_lists_valid_names() {
        let err = ValidationError::UnknownTask {
            name: "nope".to_string(),
            valid: vec!["echo".to_string(), "noop".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "nope is not a valid task name - valid tasks: echo, noop"
        );
    }
}
