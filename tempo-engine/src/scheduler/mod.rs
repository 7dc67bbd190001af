//! Scheduler layer
//!
//! Two polling loops feed the worker pool: one scans storage for due jobs,
//! the other drains the job queue of immediate runs.

pub mod poller;

pub use poller::Scheduler;
