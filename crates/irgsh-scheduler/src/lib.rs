//! Pipeline scheduling for irgsh.
//!
//! Sends package pipelines to the task-queue backend as build-then-repo
//! chains and derives their status back from per-stage task states.
//! Building itself happens in out-of-process workers.

pub mod error;
pub mod orchestrator;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use orchestrator::{PipelineOrchestrator, PipelineStatus};
pub use queue::{MemoryTaskQueue, RedisTaskQueue};
