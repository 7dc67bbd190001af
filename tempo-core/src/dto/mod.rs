//! Admission request objects
//!
//! DTOs are the shapes accepted by the admission services before they are
//! turned into domain entities.

pub mod job;
pub mod pipeline;
