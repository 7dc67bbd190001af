//! Tempo Engine
//!
//! Runs jobs and pipelines on a fixed pool of workers.
//!
//! Architecture:
//! - Repository: storage of jobs, pipelines, results and transactions
//! - Queue: bounded FIFO of jobs asking to run immediately
//! - Tasks: registry of the named async functions jobs execute
//! - Worker: pool that executes work under deadlines and cancellation
//! - Scheduler: loops feeding due and queued jobs into the pool
//! - Service: admission and management of jobs and pipelines
//! - Manifest: jobs and pipelines admitted at startup

pub mod config;
pub mod error;
pub mod manifest;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod tasks;
pub mod worker;
