//! Worker fleet tracking for irgsh.
//!
//! Workers push heartbeats into a [`FleetRegistry`]; the chief reads them
//! back with liveness classified at read time and runs a [`Janitor`] that
//! removes instances silent for too long.

pub mod error;
pub mod heartbeat;
pub mod janitor;
pub mod metrics;
pub mod registry;
pub mod store;

pub use error::{FleetError, FleetResult};
pub use heartbeat::{ActiveTaskGuard, ActiveTasks, Heartbeat};
pub use janitor::Janitor;
pub use registry::{CleanupReport, FleetRegistry};
pub use store::{Batch, FleetStore, MemoryFleetStore, RedisFleetStore};
