//! Core domain types
//!
//! This module contains the entities the engine schedules and executes.
//! The structures are shared between the admission services (which create
//! them), the storage capability (which persists them) and the worker pool
//! (which drives them through their lifecycle).

pub mod job;
pub mod pipeline;
pub mod transaction;
