//! Fleet registry: worker liveness tracking over a key/set store.
//!
//! Key layout:
//! - `instance:<id>` holds the serialized [`InstanceInfo`], with a TTL
//! - `instance:index` is the set of every known instance id
//! - `instance:<type>:index` is the set of instance ids of one type
//!
//! The index sets never expire, so they may name instances whose record
//! is already gone. Reads skip those; [`FleetRegistry::cleanup_stale_instances`]
//! is the only path that shrinks the indices.

use chrono::{DateTime, Utc};
use irgsh_core::fleet::{
    FleetThresholds, InstanceFilter, InstanceInfo, InstanceStatus, InstanceSummary, InstanceType,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::{Batch, FleetStore};
use crate::{FleetError, FleetResult};

const KEY_PREFIX: &str = "instance:";
const GLOBAL_INDEX: &str = "instance:index";

fn record_key(instance_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, instance_id)
}

/// Ids that would map onto an index key, or onto nothing, name no record.
fn is_record_id(instance_id: &str) -> bool {
    !instance_id.is_empty() && instance_id != "index" && !instance_id.contains(':')
}

fn type_index_key(instance_type: InstanceType) -> String {
    format!("{}{}:index", KEY_PREFIX, instance_type)
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Indexed ids whose record had already expired.
    pub expired: usize,
    /// Instances removed for not sending a heartbeat in time.
    pub timed_out: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.expired + self.timed_out
    }
}

/// Tracks worker instances and classifies their liveness on read.
#[derive(Clone)]
pub struct FleetRegistry {
    store: Arc<dyn FleetStore>,
    thresholds: FleetThresholds,
}

impl FleetRegistry {
    pub fn new(store: Arc<dyn FleetStore>, thresholds: FleetThresholds) -> Self {
        Self { store, thresholds }
    }

    pub fn thresholds(&self) -> FleetThresholds {
        self.thresholds
    }

    /// Record a heartbeat: stamp it, store it and index it in one batch.
    pub async fn update_instance(&self, mut info: InstanceInfo) -> FleetResult<InstanceInfo> {
        if info.instance_id.is_empty() {
            info.instance_id = InstanceInfo::instance_id_for(&info.hostname, info.instance_type);
        }
        if !is_record_id(&info.instance_id) {
            return Err(FleetError::InvalidId(info.instance_id));
        }
        info.last_heartbeat = Utc::now();
        info.status = InstanceStatus::Online;

        let value = serde_json::to_string(&info)?;
        let mut batch = Batch::new();
        batch
            .set(record_key(&info.instance_id), value, self.thresholds.record_ttl)
            .set_add(GLOBAL_INDEX, info.instance_id.as_str())
            .set_add(type_index_key(info.instance_type), info.instance_id.as_str());
        self.store.apply(batch).await?;

        debug!(instance_id = %info.instance_id, instance_type = %info.instance_type, "Heartbeat recorded");
        Ok(info)
    }

    /// Look up one instance, classified against the current time.
    pub async fn get_instance(&self, instance_id: &str) -> FleetResult<InstanceInfo> {
        self.load(instance_id, Utc::now())
            .await?
            .ok_or_else(|| FleetError::NotFound(instance_id.to_string()))
    }

    /// Every resolvable instance matching `filter`, ordered by id.
    pub async fn list_instances(&self, filter: InstanceFilter) -> FleetResult<Vec<InstanceInfo>> {
        let index = match filter.instance_type {
            Some(instance_type) => type_index_key(instance_type),
            None => GLOBAL_INDEX.to_string(),
        };

        let now = Utc::now();
        let mut ids = self.store.members(&index).await?;
        ids.sort();

        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load(&id, now).await {
                Ok(Some(info)) if filter.matches(&info) => instances.push(info),
                Ok(Some(_)) => {}
                Ok(None) => debug!(instance_id = %id, "Skipping indexed instance without record"),
                Err(e) => warn!(instance_id = %id, error = %e, "Skipping unreadable instance"),
            }
        }
        Ok(instances)
    }

    /// Total, online, offline and per-type counts.
    pub async fn summary(&self) -> FleetResult<InstanceSummary> {
        let instances = self.list_instances(InstanceFilter::default()).await?;
        Ok(InstanceSummary::from_instances(&instances))
    }

    /// Start time to report for a worker identity.
    ///
    /// A worker restarting while its previous record is still stored keeps
    /// the original start time.
    pub async fn start_time_for(&self, instance_id: &str) -> DateTime<Utc> {
        match self.load(instance_id, Utc::now()).await {
            Ok(Some(info)) => info.start_time,
            _ => Utc::now(),
        }
    }

    /// Remove instances whose record expired or whose heartbeat is older
    /// than the removal threshold, from the store and from every index.
    pub async fn cleanup_stale_instances(&self) -> FleetResult<CleanupReport> {
        self.cleanup_at(Utc::now()).await
    }

    async fn cleanup_at(&self, now: DateTime<Utc>) -> FleetResult<CleanupReport> {
        let mut ids: BTreeSet<String> = self.store.members(GLOBAL_INDEX).await?.into_iter().collect();
        for instance_type in InstanceType::ALL {
            ids.extend(self.store.members(&type_index_key(instance_type)).await?);
        }

        let mut report = CleanupReport::default();

        for id in ids {
            let key = record_key(&id);
            let raw = match self.store.get(&key).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(instance_id = %id, error = %e, "Failed to read instance during cleanup");
                    continue;
                }
            };

            let timed_out = match raw.as_deref().map(serde_json::from_str::<InstanceInfo>) {
                None => false,
                Some(Ok(info)) if info.heartbeat_age(now) > self.thresholds.removal_after => true,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(instance_id = %id, error = %e, "Removing unreadable instance record");
                    false
                }
            };

            // A heartbeat landing after the read changes the record, which
            // voids the removal.
            let mut batch = Batch::new();
            batch.require(key.as_str(), raw.clone());
            if raw.is_some() {
                batch.delete(key.as_str());
            }
            Self::unindex(&mut batch, &id);

            match self.store.apply(batch).await {
                Ok(true) if timed_out => report.timed_out += 1,
                Ok(true) => report.expired += 1,
                Ok(false) => debug!(instance_id = %id, "Instance sent a heartbeat during cleanup, kept"),
                Err(e) => warn!(instance_id = %id, error = %e, "Failed to remove stale instance"),
            }
        }

        if report.removed() > 0 {
            info!(
                removed = report.removed(),
                expired = report.expired,
                timed_out = report.timed_out,
                "Removed stale instances"
            );
            match self.store.count_keys(KEY_PREFIX).await {
                Ok(keys) => info!(keys, "Fleet keys in use"),
                Err(e) => debug!(error = %e, "Could not count fleet keys"),
            }
        }

        Ok(report)
    }

    /// The type of an instance is not known once its record is gone, so
    /// the id is dropped from every type index.
    fn unindex(batch: &mut Batch, id: &str) {
        batch.set_remove(GLOBAL_INDEX, id);
        for instance_type in InstanceType::ALL {
            batch.set_remove(type_index_key(instance_type), id);
        }
    }

    async fn load(&self, instance_id: &str, now: DateTime<Utc>) -> FleetResult<Option<InstanceInfo>> {
        if !is_record_id(instance_id) {
            return Ok(None);
        }
        let Some(raw) = self.store.get(&record_key(instance_id)).await? else {
            return Ok(None);
        };
        let mut info: InstanceInfo = serde_json::from_str(&raw)?;
        if info.heartbeat_age(now) > self.thresholds.instance_ttl {
            info.status = InstanceStatus::Offline;
        }
        Ok(Some(info))
    }
}
