//! Job DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobOptions, TaskParams};

/// Request to create a standalone job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateJob {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub task_name: String,
    #[serde(default)]
    pub task_params: TaskParams,
    /// Timeout in timeout units, 0 means the engine default
    #[serde(default)]
    pub timeout: u64,
    /// RFC 3339 timestamp or a relative interval such as "15 sec"
    #[serde(default)]
    pub run_at: Option<String>,
    /// Push the job onto the job queue instead of waiting for the due scan
    #[serde(default)]
    pub run_now: bool,
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub options: JobOptions,
}

/// Partial update of a job; `None` leaves the field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateJob {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub disable: Option<bool>,
    #[serde(default)]
    pub options: Option<JobOptions>,
}
