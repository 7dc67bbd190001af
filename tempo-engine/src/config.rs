//! Engine configuration
//!
//! Every setting can be passed as a flag or through a `TEMPO_*` environment
//! variable. Intervals and job timeouts are counted in `timeout_unit`s.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Unit in which intervals and job timeouts are expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TimeoutUnit {
    Second,
    Millisecond,
}

impl TimeoutUnit {
    pub fn duration(self) -> Duration {
        match self {
            TimeoutUnit::Second => Duration::from_secs(1),
            TimeoutUnit::Millisecond => Duration::from_millis(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Engine configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "tempo")]
#[command(about = "Task automation engine", long_about = None)]
pub struct Config {
    /// Number of concurrent workers (defaults to the available parallelism)
    #[arg(long, env = "TEMPO_WORKERS")]
    pub workers: Option<usize>,

    /// Capacity of the worker pool channel (defaults to workers x 2)
    #[arg(long, env = "TEMPO_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Capacity of the job queue used for immediate runs
    #[arg(long, env = "TEMPO_JOB_QUEUE_CAPACITY", default_value_t = 100)]
    pub job_queue_capacity: usize,

    #[arg(long, env = "TEMPO_TIMEOUT_UNIT", value_enum, default_value_t = TimeoutUnit::Second)]
    pub timeout_unit: TimeoutUnit,

    /// How often storage is scanned for due jobs, in timeout units
    #[arg(long, env = "TEMPO_STORAGE_POLLING_INTERVAL", default_value_t = 60)]
    pub storage_polling_interval: u64,

    /// How often the job queue is polled, in timeout units
    #[arg(long, env = "TEMPO_JOB_QUEUE_POLLING_INTERVAL", default_value_t = 1)]
    pub job_queue_polling_interval: u64,

    #[arg(long, env = "TEMPO_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// JSON file of jobs and pipelines admitted at startup
    #[arg(long, env = "TEMPO_MANIFEST")]
    pub manifest: Option<PathBuf>,
}

impl Config {
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or_else(|| self.workers() * 2)
    }

    pub fn storage_polling_interval(&self) -> Duration {
        self.timeout_unit.duration() * self.storage_polling_interval as u32
    }

    pub fn job_queue_polling_interval(&self) -> Duration {
        self.timeout_unit.duration() * self.job_queue_polling_interval as u32
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers() == 0 {
            anyhow::bail!("workers must be greater than 0");
        }

        if self.queue_capacity() == 0 {
            anyhow::bail!("queue_capacity must be greater than 0");
        }

        if self.job_queue_capacity == 0 {
            anyhow::bail!("job_queue_capacity must be greater than 0");
        }

        if self.storage_polling_interval == 0 {
            anyhow::bail!("storage_polling_interval must be greater than 0");
        }

        if self.job_queue_polling_interval == 0 {
            anyhow::bail!("job_queue_polling_interval must be greater than 0");
        }

        if u32::try_from(self.storage_polling_interval).is_err()
            || u32::try_from(self.job_queue_polling_interval).is_err()
        {
            anyhow::bail!("polling intervals must fit in 32 bits");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: None,
            job_queue_capacity: 100,
            timeout_unit: TimeoutUnit::Second,
            storage_polling_interval: 60,
            job_queue_polling_interval: 1,
            log_format: LogFormat::Text,
            manifest: None,
        }
    }
}
