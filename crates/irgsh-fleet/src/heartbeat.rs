//! Worker-side heartbeat loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use irgsh_core::fleet::{InstanceInfo, InstanceType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{self, CpuSampler};
use crate::registry::FleetRegistry;
use crate::FleetResult;

/// Default interval between heartbeats (30 seconds).
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Count of tasks a worker is currently running.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ActiveTasks(Arc<AtomicU32>);

impl ActiveTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a task as active until the returned guard is dropped.
    pub fn enter(&self) -> ActiveTaskGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveTaskGuard(self.0.clone())
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

#[must_use = "the task stops counting as active when the guard is dropped"]
pub struct ActiveTaskGuard(Arc<AtomicU32>);

impl Drop for ActiveTaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hostname of this machine, `localhost` if it cannot be read.
pub fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Periodically pushes this worker's [`InstanceInfo`] to the registry.
pub struct Heartbeat {
    registry: FleetRegistry,
    instance_type: InstanceType,
    hostname: String,
    version: String,
    concurrency: u32,
    workdir: PathBuf,
    interval: Duration,
    active: ActiveTasks,
}

impl Heartbeat {
    pub fn new(registry: FleetRegistry, instance_type: InstanceType, workdir: PathBuf) -> Self {
        Self {
            registry,
            instance_type,
            hostname: local_hostname(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            concurrency: 1,
            workdir,
            interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            active: ActiveTasks::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_active_tasks(mut self, active: ActiveTasks) -> Self {
        self.active = active;
        self
    }

    pub fn instance_id(&self) -> String {
        InstanceInfo::instance_id_for(&self.hostname, self.instance_type)
    }

    /// Send one heartbeat immediately, then one per interval, until
    /// shutdown is signalled. Failed sends are logged and retried on the
    /// next tick.
    pub async fn run(self, shutdown: CancellationToken) {
        let instance_id = self.instance_id();
        let start_time = self.registry.start_time_for(&instance_id).await;
        let mut sampler = CpuSampler::new();

        info!(
            instance_id = %instance_id,
            interval_secs = self.interval.as_secs(),
            "Heartbeat starting"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(instance_id = %instance_id, "Heartbeat shutting down");
                    break;
                }

                _ = interval.tick() => {
                    if let Err(e) = self.beat(&mut sampler, start_time).await {
                        warn!(instance_id = %instance_id, error = %e, "Failed to send heartbeat");
                    }
                }
            }
        }
    }

    async fn beat(&self, sampler: &mut CpuSampler, start_time: DateTime<Utc>) -> FleetResult<()> {
        let host = metrics::collect(sampler, &self.workdir);

        let mut info = InstanceInfo::new(
            &self.hostname,
            self.instance_type,
            std::process::id(),
            &self.version,
        );
        info.start_time = start_time;
        info.concurrency = self.concurrency;
        info.active_tasks = self.active.count();
        info.cpu_usage = host.cpu_usage;
        info.memory_usage = host.memory_usage;
        info.memory_total = host.memory_total;
        info.disk_usage = host.disk_usage;
        info.disk_total = host.disk_total;

        let info = self.registry.update_instance(info).await?;
        debug!(
            instance_id = %info.instance_id,
            active_tasks = info.active_tasks,
            cpu_usage = info.cpu_usage,
            memory = %metrics::format_bytes(info.memory_usage),
            "Heartbeat sent"
        );
        Ok(())
    }
}
