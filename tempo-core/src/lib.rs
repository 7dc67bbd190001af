//! Tempo Core
//!
//! Core types and pure logic for the Tempo task-automation engine.
//!
//! This crate contains:
//! - Domain types: Jobs, pipelines, results and audit transactions
//! - Schedule grammar: interval and run-at expressions
//! - DTOs: Admission requests handed to the engine services

pub mod domain;
pub mod dto;
pub mod error;
pub mod schedule;
