//! Periodic removal of stale fleet entries.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::registry::{CleanupReport, FleetRegistry};
use crate::FleetResult;

/// Background sweep invoking [`FleetRegistry::cleanup_stale_instances`].
pub struct Janitor {
    registry: FleetRegistry,
    interval: Duration,
}

impl Janitor {
    pub fn new(registry: FleetRegistry, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// One cleanup pass.
    pub async fn run_once(&self) -> FleetResult<CleanupReport> {
        self.registry.cleanup_stale_instances().await
    }

    /// Sweep every interval until shutdown is signalled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            removal_after_secs = self.registry.thresholds().removal_after.as_secs(),
            "Fleet janitor starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Fleet janitor shutting down");
                    break;
                }

                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "Fleet cleanup failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Batch, FleetStore, MemoryFleetStore};
    use chrono::Utc;
    use irgsh_core::fleet::{FleetThresholds, InstanceFilter, InstanceInfo, InstanceType};
    use std::sync::Arc;

    async fn stale_registry() -> FleetRegistry {
        let store = Arc::new(MemoryFleetStore::new());
        let mut info = InstanceInfo::new("old", InstanceType::Builder, 1, "1.0");
        info.last_heartbeat = Utc::now() - chrono::Duration::hours(30);

        let mut batch = Batch::new();
        batch
            .set(
                "instance:old-builder",
                serde_json::to_string(&info).unwrap(),
                Duration::from_secs(3600),
            )
            .set_add("instance:index", "old-builder")
            .set_add("instance:builder:index", "old-builder");
        store.apply(batch).await.unwrap();

        FleetRegistry::new(store, FleetThresholds::default())
    }

    #[tokio::test]
    async fn test_run_once() {
        let registry = stale_registry().await;
        let janitor = Janitor::new(registry.clone(), Duration::from_secs(3600));

        let report = janitor.run_once().await.unwrap();
        assert_eq!(report.timed_out, 1);
        assert!(registry.list_instances(InstanceFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loop_sweeps_until_cancelled() {
        let registry = stale_registry().await;
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            Janitor::new(registry.clone(), Duration::from_millis(20)).run(shutdown.clone()),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        let summary = registry.summary().await.unwrap();
        assert_eq!(summary.total, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_sweep() {
        let registry = stale_registry().await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        Janitor::new(registry.clone(), Duration::from_secs(3600))
            .run(shutdown)
            .await;

        assert_eq!(registry.summary().await.unwrap().total, 1);
    }
}
