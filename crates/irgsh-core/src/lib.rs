//! Core domain types and traits for irgsh.
//!
//! This crate contains:
//! - Pipeline identifiers and the pipeline/stage state machine
//! - Job and ISO job records
//! - Worker instance records for the fleet registry
//! - Submissions and typed task payloads
//! - Task-queue, storage and signature-verification traits

pub mod artifact;
pub mod error;
pub mod fleet;
pub mod id;
pub mod job;
pub mod pipeline;
pub mod queue;
pub mod submission;

pub use error::{Error, Result};
pub use id::TaskUuid;
