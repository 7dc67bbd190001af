//! Startup manifest
//!
//! A JSON file listing the jobs and pipelines the binary admits before the
//! scheduler starts:
//!
//! ```json
//! {
//!   "jobs": [{ "name": "ping", "task_name": "ping", "task_params": { "host": "localhost" } }],
//!   "pipelines": []
//! }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tempo_core::dto::job::CreateJob;
use tempo_core::dto::pipeline::CreatePipeline;
use tracing::info;

use crate::service::{JobService, PipelineService};

#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub jobs: Vec<CreateJob>,
    #[serde(default)]
    pub pipelines: Vec<CreatePipeline>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    /// Admits every entry, stopping at the first rejected one
    pub async fn apply(self, jobs: &JobService, pipelines: &PipelineService) -> Result<(usize, usize)> {
        let job_count = self.jobs.len();
        let pipeline_count = self.pipelines.len();

        for request in self.jobs {
            let name = request.name.clone();
            jobs.create(request)
                .await
                .with_context(|| format!("Job '{name}' was rejected"))?;
        }
        for request in self.pipelines {
            let name = request.name.clone();
            pipelines
                .create(request)
                .await
                .with_context(|| format!("Pipeline '{name}' was rejected"))?;
        }

        info!(jobs = job_count, pipelines = pipeline_count, "Manifest applied");
        Ok((job_count, pipeline_count))
    }
}
