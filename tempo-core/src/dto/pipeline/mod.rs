//! Pipeline DTOs

use serde::{Deserialize, Serialize};

use crate::domain::job::{JobOptions, TaskParams};
use crate::domain::pipeline::PipelineOptions;

/// Request to create a pipeline from an ordered list of jobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub run_at: Option<String>,
    #[serde(default)]
    pub run_now: bool,
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub options: PipelineOptions,
    pub jobs: Vec<CreatePipelineJob>,
}

/// One step of a pipeline creation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePipelineJob {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub task_name: String,
    #[serde(default)]
    pub task_params: TaskParams,
    #[serde(default)]
    pub timeout: u64,
    /// Hand the metadata of the previous step to this step's task
    #[serde(default)]
    pub use_previous_results: bool,
    #[serde(default)]
    pub options: JobOptions,
}

/// Partial update of a pipeline; `None` leaves the field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePipeline {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub disable: Option<bool>,
    #[serde(default)]
    pub options: Option<PipelineOptions>,
}
