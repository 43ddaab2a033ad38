//! KDL configuration parsing for irgsh.
//!
//! One document configures the chief process: broker and fleet store
//! address, working directories, task-queue naming, fleet monitoring
//! intervals and job store capacity.

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    ChiefConfig, MonitoringConfig, QueueConfig, StorageConfig, SystemConfig, load_system_config,
    parse_system_config,
};
