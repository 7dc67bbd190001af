//! Persistence layer
//!
//! The engine only talks to storage through the [`Storage`] trait. One
//! in-memory implementation ships with the crate.

pub mod memory;
pub mod storage;

pub use memory::InMemoryStorage;
pub use storage::{Event, JOB_TOPIC, Storage, StorageError, TRANSACTION_TOPIC};
