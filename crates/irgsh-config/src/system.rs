//! System configuration parsing.

use crate::{ConfigError, ConfigResult};
use irgsh_core::fleet::FleetThresholds;
use kdl::{KdlDocument, KdlNode};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_QUEUE_NAME: &str = "irgsh";
const DEFAULT_RESULT_TTL_SECS: u64 = 3600;
const DEFAULT_HEARTBEAT_SECS: u64 = 30;
const DEFAULT_CLEANUP_SECS: u64 = 3600;
const DEFAULT_MAX_JOBS: usize = 1000;
const DEFAULT_MAX_ISO_JOBS: usize = 200;

/// Configuration of the chief process.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Broker of the task queue, also backing the fleet registry.
    pub redis_url: Url,
    pub chief: ChiefConfig,
    pub queue: QueueConfig,
    pub monitoring: MonitoringConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct ChiefConfig {
    /// Socket address the HTTP server binds to.
    pub address: String,
    /// Root of the `submissions/` and `artifacts/` trees.
    pub workdir: PathBuf,
    /// GnuPG home holding the maintainer keyring. Unset means the
    /// verifier runs against the invoking user's default keyring.
    pub gnupg_dir: Option<PathBuf>,
    /// Copy artifacts through `sudo` on retry.
    pub privileged_copy: bool,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Broker list signatures are pushed onto.
    pub name: String,
    /// How long workers keep per-signature state around.
    pub result_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Enables the fleet registry and job tracking.
    pub enabled: bool,
    pub heartbeat_interval: Duration,
    pub cleanup_interval: Duration,
    pub thresholds: FleetThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_SECS),
            thresholds: FleetThresholds::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// SQLite database file of the job store.
    pub database: PathBuf,
    pub max_jobs: usize,
    pub max_iso_jobs: usize,
}

/// Load and parse the configuration file at `path`.
pub fn load_system_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_system_config(&text)
}

/// Parse system configuration from KDL text.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut seen = HashSet::new();
    let mut redis_url = None;
    let mut chief = None;
    let mut queue = None;
    let mut monitoring = None;
    let mut storage = None;

    for node in doc.nodes() {
        let name = node.name().value();
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::Duplicate(name.to_string()));
        }
        match name {
            "redis" => {
                let raw = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("redis".to_string()))?;
                redis_url = Some(parse_url("redis", &raw)?);
            }
            "chief" => chief = Some(parse_chief(node)?),
            "queue" => queue = Some(parse_queue(node)?),
            "monitoring" => monitoring = Some(parse_monitoring(node)?),
            "storage" => storage = Some(node),
            _ => {}
        }
    }

    let redis_url = match redis_url {
        Some(url) => url,
        None => parse_url("redis", DEFAULT_REDIS_URL)?,
    };
    let chief = chief.ok_or_else(|| ConfigError::MissingField("chief".to_string()))?;
    let storage = parse_storage(storage, &chief.workdir)?;

    Ok(SystemConfig {
        redis_url,
        chief,
        queue: queue.unwrap_or_else(|| QueueConfig {
            name: DEFAULT_QUEUE_NAME.to_string(),
            result_ttl: Duration::from_secs(DEFAULT_RESULT_TTL_SECS),
        }),
        monitoring: monitoring.unwrap_or_default(),
        storage,
    })
}

fn parse_url(field: &str, raw: &str) -> ConfigResult<Url> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        message: e.to_string(),
    })
}

fn parse_chief(node: &KdlNode) -> ConfigResult<ChiefConfig> {
    let mut address = DEFAULT_ADDRESS.to_string();
    let mut workdir = None;
    let mut gnupg_dir = None;
    let mut privileged_copy = true;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "address" => {
                    if let Some(value) = get_first_string_arg(child) {
                        address = value;
                    }
                }
                "workdir" => workdir = get_first_string_arg(child).map(PathBuf::from),
                "gnupg-dir" => gnupg_dir = get_first_string_arg(child).map(PathBuf::from),
                "privileged-copy" => {
                    privileged_copy = get_first_bool_arg(child).ok_or_else(|| {
                        ConfigError::InvalidValue {
                            field: "chief.privileged-copy".to_string(),
                            message: "expected #true or #false".to_string(),
                        }
                    })?;
                }
                _ => {}
            }
        }
    }

    let workdir = workdir
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| ConfigError::MissingField("chief.workdir".to_string()))?;

    Ok(ChiefConfig {
        address,
        workdir,
        gnupg_dir,
        privileged_copy,
    })
}

fn parse_queue(node: &KdlNode) -> ConfigResult<QueueConfig> {
    let mut name = DEFAULT_QUEUE_NAME.to_string();
    let mut result_ttl = DEFAULT_RESULT_TTL_SECS;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "name" => {
                    if let Some(value) = get_first_string_arg(child).filter(|v| !v.is_empty()) {
                        name = value;
                    }
                }
                "result-ttl" => {
                    result_ttl = positive_or(get_u64_arg(child, "queue.result-ttl")?, result_ttl)
                }
                _ => {}
            }
        }
    }

    Ok(QueueConfig {
        name,
        result_ttl: Duration::from_secs(result_ttl),
    })
}

fn parse_monitoring(node: &KdlNode) -> ConfigResult<MonitoringConfig> {
    let defaults = MonitoringConfig::default();
    let mut heartbeat = defaults.heartbeat_interval.as_secs();
    let mut cleanup = defaults.cleanup_interval.as_secs();
    let mut instance_ttl = defaults.thresholds.instance_ttl.as_secs();
    let mut removal = defaults.thresholds.removal_after.as_secs();
    let mut record_ttl = defaults.thresholds.record_ttl.as_secs();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let field = child.name().value();
            let slot = match field {
                "heartbeat-interval" => &mut heartbeat,
                "instance-timeout" => &mut instance_ttl,
                "cleanup-interval" => &mut cleanup,
                "removal-timeout" => &mut removal,
                "record-ttl" => &mut record_ttl,
                _ => continue,
            };
            *slot = positive_or(get_u64_arg(child, &format!("monitoring.{}", field))?, *slot);
        }
    }

    if removal < instance_ttl {
        return Err(ConfigError::InvalidValue {
            field: "monitoring.removal-timeout".to_string(),
            message: "must not be shorter than instance-timeout".to_string(),
        });
    }

    Ok(MonitoringConfig {
        enabled: get_bool_prop(node, "enabled").unwrap_or(true),
        heartbeat_interval: Duration::from_secs(heartbeat),
        cleanup_interval: Duration::from_secs(cleanup),
        thresholds: FleetThresholds {
            instance_ttl: Duration::from_secs(instance_ttl),
            record_ttl: Duration::from_secs(record_ttl),
            removal_after: Duration::from_secs(removal),
        },
    })
}

fn parse_storage(node: Option<&KdlNode>, workdir: &Path) -> ConfigResult<StorageConfig> {
    let mut config = StorageConfig {
        database: workdir.join("irgsh.db"),
        max_jobs: DEFAULT_MAX_JOBS,
        max_iso_jobs: DEFAULT_MAX_ISO_JOBS,
    };

    let Some(children) = node.and_then(|n| n.children()) else {
        return Ok(config);
    };

    for child in children.nodes() {
        match child.name().value() {
            "database" => {
                if let Some(value) = get_first_string_arg(child).filter(|v| !v.is_empty()) {
                    config.database = PathBuf::from(value);
                }
            }
            "max-jobs" => {
                let value = get_u64_arg(child, "storage.max-jobs")?;
                config.max_jobs = positive_or(value, config.max_jobs as u64) as usize;
            }
            "max-iso-jobs" => {
                let value = get_u64_arg(child, "storage.max-iso-jobs")?;
                config.max_iso_jobs = positive_or(value, config.max_iso_jobs as u64) as usize;
            }
            _ => {}
        }
    }

    Ok(config)
}

/// Zero and absent values fall back to the default.
fn positive_or(value: Option<u64>, default: u64) -> u64 {
    value.filter(|v| *v > 0).unwrap_or(default)
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_bool_arg(node: &KdlNode) -> Option<bool> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_bool())
}

fn get_u64_arg(node: &KdlNode, field: &str) -> ConfigResult<Option<u64>> {
    let Some(entry) = node.entries().iter().find(|e| e.name().is_none()) else {
        return Ok(None);
    };
    let value = entry
        .value()
        .as_integer()
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: "expected an integer".to_string(),
        })?;
    u64::try_from(value)
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("{} is out of range", value),
        })
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        redis "redis://broker.internal:6379/1"
        chief {
            address "127.0.0.1:9000"
            workdir "/srv/irgsh"
            gnupg-dir "/srv/irgsh/gnupg"
            privileged-copy #false
        }
        queue {
            name "blankon"
            result-ttl 7200
        }
        monitoring enabled=#true {
            heartbeat-interval 15
            instance-timeout 60
            cleanup-interval 600
            removal-timeout 43200
            record-ttl 43200
        }
        storage {
            database "/srv/irgsh/jobs.db"
            max-jobs 50
            max-iso-jobs 10
        }
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = parse_system_config(FULL).unwrap();

        assert_eq!(config.redis_url.host_str(), Some("broker.internal"));
        assert_eq!(config.chief.address, "127.0.0.1:9000");
        assert_eq!(config.chief.workdir, PathBuf::from("/srv/irgsh"));
        assert_eq!(config.chief.gnupg_dir, Some(PathBuf::from("/srv/irgsh/gnupg")));
        assert!(!config.chief.privileged_copy);
        assert_eq!(config.queue.name, "blankon");
        assert_eq!(config.queue.result_ttl, Duration::from_secs(7200));
        assert!(config.monitoring.enabled);
        assert_eq!(config.monitoring.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.monitoring.cleanup_interval, Duration::from_secs(600));
        assert_eq!(config.monitoring.thresholds.instance_ttl, Duration::from_secs(60));
        assert_eq!(config.monitoring.thresholds.removal_after, Duration::from_secs(43200));
        assert_eq!(config.storage.database, PathBuf::from("/srv/irgsh/jobs.db"));
        assert_eq!(config.storage.max_jobs, 50);
        assert_eq!(config.storage.max_iso_jobs, 10);
    }

    #[test]
    fn test_defaults() {
        let config = parse_system_config(r#"chief { workdir "/var/lib/irgsh"; }"#).unwrap();

        assert_eq!(config.redis_url.as_str(), "redis://127.0.0.1:6379/0");
        assert_eq!(config.chief.address, "0.0.0.0:8080");
        assert!(config.chief.privileged_copy);
        assert_eq!(config.chief.gnupg_dir, None);
        assert_eq!(config.queue.name, "irgsh");
        assert!(!config.monitoring.enabled);
        assert_eq!(config.monitoring.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.monitoring.thresholds, FleetThresholds::default());
        assert_eq!(config.storage.database, PathBuf::from("/var/lib/irgsh/irgsh.db"));
        assert_eq!(config.storage.max_jobs, 1000);
        assert_eq!(config.storage.max_iso_jobs, 200);
    }

    #[test]
    fn test_zero_values_fall_back_to_defaults() {
        let config = parse_system_config(
            r#"
            chief { workdir "/var/lib/irgsh"; }
            monitoring {
                heartbeat-interval 0
                instance-timeout 0
            }
            storage { max-jobs 0; }
            "#,
        )
        .unwrap();

        assert!(config.monitoring.enabled);
        assert_eq!(config.monitoring.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.monitoring.thresholds.instance_ttl, Duration::from_secs(90));
        assert_eq!(config.storage.max_jobs, 1000);
    }

    #[test]
    fn test_missing_workdir() {
        let err = parse_system_config(r#"chief { address "0.0.0.0:1"; }"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "chief.workdir"));

        let err = parse_system_config(r#"redis "redis://localhost""#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "chief"));
    }

    #[test]
    fn test_invalid_values() {
        let err = parse_system_config(
            r#"redis "not a url"
            chief { workdir "/x"; }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = parse_system_config(
            r#"chief { workdir "/x"; }
            storage { max-jobs -5; }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = parse_system_config(
            r#"chief { workdir "/x"; }
            monitoring { instance-timeout 600; removal-timeout 60; }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_duplicate_section() {
        let err = parse_system_config(
            r#"chief { workdir "/x"; }
            chief { workdir "/y"; }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Duplicate(_)));
    }
}
