//! Application state.

use irgsh_config::SystemConfig;
use irgsh_db::{SqliteIsoJobRepo, SqliteJobRepo, create_pool, run_migrations};
use irgsh_executor::{GpgVerifier, LocalStorage};
use irgsh_fleet::{FleetRegistry, RedisFleetStore};
use irgsh_scheduler::{PipelineOrchestrator, RedisTaskQueue};
use std::sync::Arc;
use tracing::info;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// Present when monitoring is enabled.
    pub fleet: Option<FleetRegistry>,
    pub version: String,
}

impl AppState {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, fleet: Option<FleetRegistry>) -> Self {
        Self {
            orchestrator,
            fleet,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Connect every backend named in the configuration.
    ///
    /// The job store and the fleet registry are only opened when
    /// monitoring is enabled.
    pub async fn connect(config: &SystemConfig) -> anyhow::Result<Self> {
        let storage = LocalStorage::new(&config.chief.workdir, config.chief.privileged_copy);
        storage.ensure_layout().await?;
        let verifier = GpgVerifier::new(config.chief.gnupg_dir.clone());

        info!(redis = %config.redis_url, queue = %config.queue.name, "Connecting to task queue");
        let queue = RedisTaskQueue::connect(
            config.redis_url.as_str(),
            &config.queue.name,
            config.queue.result_ttl,
        )
        .await?;

        let mut orchestrator =
            PipelineOrchestrator::new(Arc::new(queue), Arc::new(storage), Arc::new(verifier));
        let mut fleet = None;

        if config.monitoring.enabled {
            info!(database = %config.storage.database.display(), "Opening job store");
            let pool = create_pool(&config.storage.database).await?;
            run_migrations(&pool).await?;
            orchestrator = orchestrator.with_job_tracking(
                Arc::new(SqliteJobRepo::new(pool.clone(), config.storage.max_jobs)),
                Arc::new(SqliteIsoJobRepo::new(pool, config.storage.max_iso_jobs)),
            );

            let store = RedisFleetStore::connect(config.redis_url.as_str()).await?;
            fleet = Some(FleetRegistry::new(Arc::new(store), config.monitoring.thresholds));
        } else {
            info!("Monitoring disabled, job tracking and fleet views are off");
        }

        Ok(Self::new(Arc::new(orchestrator), fleet))
    }
}
