//! Worker pool
//!
//! A fixed number of workers consume [`Work`] items from one bounded channel
//! and execute them against the task registry, persisting every state change.

pub mod pool;
pub mod work;

pub use pool::{DEFAULT_TIMEOUT, WorkerPool};
pub use work::{Work, WorkKind};
