//! Worker instance records and fleet thresholds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

/// Kind of worker process reporting heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Builder,
    Repo,
    Iso,
}

impl InstanceType {
    pub const ALL: [InstanceType; 3] = [InstanceType::Builder, InstanceType::Repo, InstanceType::Iso];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::Builder => "builder",
            InstanceType::Repo => "repo",
            InstanceType::Iso => "iso",
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "builder" => Ok(InstanceType::Builder),
            "repo" => Ok(InstanceType::Repo),
            "iso" => Ok(InstanceType::Iso),
            other => Err(Error::Validation(format!("unknown instance type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Online,
    Offline,
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Online => "online",
            InstanceStatus::Offline => "offline",
            InstanceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(InstanceStatus::Online),
            "offline" => Ok(InstanceStatus::Offline),
            "unknown" => Ok(InstanceStatus::Unknown),
            other => Err(Error::Validation(format!("unknown instance status: {}", other))),
        }
    }
}

/// Liveness and metrics of one worker identity.
///
/// The id is derived from hostname and type only, so a restarted worker
/// overwrites its own record instead of adding a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub instance_type: InstanceType,
    pub hostname: String,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: InstanceStatus,
    pub concurrency: u32,
    pub active_tasks: u32,
    pub cpu_usage: f64,
    pub memory_usage: u64,
    pub memory_total: u64,
    pub disk_usage: u64,
    pub disk_total: u64,
    pub version: String,
}

impl InstanceInfo {
    pub fn instance_id_for(hostname: &str, instance_type: InstanceType) -> String {
        format!("{}-{}", hostname, instance_type)
    }

    /// A fresh record for a worker that has just started.
    pub fn new(hostname: &str, instance_type: InstanceType, pid: u32, version: &str) -> Self {
        let now = Utc::now();
        Self {
            instance_id: Self::instance_id_for(hostname, instance_type),
            instance_type,
            hostname: hostname.to_string(),
            pid,
            start_time: now,
            last_heartbeat: now,
            status: InstanceStatus::Online,
            concurrency: 0,
            active_tasks: 0,
            cpu_usage: 0.0,
            memory_usage: 0,
            memory_total: 0,
            disk_usage: 0,
            disk_total: 0,
            version: version.to_string(),
        }
    }

    /// Time since the last heartbeat, zero if the clock went backwards.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Aggregate counts over the currently resolvable instances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub by_type: BTreeMap<String, usize>,
}

impl InstanceSummary {
    pub fn from_instances<'a>(instances: impl IntoIterator<Item = &'a InstanceInfo>) -> Self {
        let mut summary = Self::default();
        for instance in instances {
            summary.total += 1;
            match instance.status {
                InstanceStatus::Online => summary.online += 1,
                InstanceStatus::Offline => summary.offline += 1,
                InstanceStatus::Unknown => {}
            }
            *summary
                .by_type
                .entry(instance.instance_type.to_string())
                .or_insert(0) += 1;
        }
        summary
    }
}

/// Optional narrowing of an instance listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFilter {
    pub instance_type: Option<InstanceType>,
    pub status: Option<InstanceStatus>,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &InstanceInfo) -> bool {
        self.instance_type.is_none_or(|t| t == instance.instance_type)
            && self.status.is_none_or(|s| s == instance.status)
    }
}

/// The staleness thresholds shared by the registry and the janitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetThresholds {
    /// Heartbeat age after which an instance reads as offline.
    pub instance_ttl: Duration,
    /// Expiry of the stored record itself.
    pub record_ttl: Duration,
    /// Heartbeat age after which the janitor removes the instance.
    pub removal_after: Duration,
}

impl Default for FleetThresholds {
    fn default() -> Self {
        Self {
            instance_ttl: Duration::from_secs(90),
            record_ttl: Duration::from_secs(24 * 60 * 60),
            removal_after: Duration::from_secs(24 * 60 * 60),
        }
    }
}
