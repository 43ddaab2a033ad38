//! Fleet commands.

use anyhow::Result;
use chrono::Utc;
use irgsh_config::load_system_config;
use irgsh_core::fleet::{InstanceInfo, InstanceStatus, InstanceSummary, InstanceType};
use irgsh_fleet::metrics::{format_bytes, format_duration};
use irgsh_fleet::{FleetRegistry, Heartbeat, Janitor, RedisFleetStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::ApiClient;

#[derive(Debug, Deserialize)]
struct InstancesResponse {
    instances: Vec<InstanceInfo>,
    summary: InstanceSummary,
}

pub async fn instances(
    api: &ApiClient,
    instance_type: Option<InstanceType>,
    status: Option<InstanceStatus>,
) -> Result<()> {
    let mut query = Vec::new();
    if let Some(t) = instance_type {
        query.push(("type", t.to_string()));
    }
    if let Some(s) = status {
        query.push(("status", s.to_string()));
    }
    let response: InstancesResponse = api.get("api/v1/instances", &query).await?;

    let summary = &response.summary;
    println!(
        "{} instances: {} online, {} offline",
        summary.total, summary.online, summary.offline
    );
    for (kind, count) in &summary.by_type {
        println!("  {:<8} {}", kind, count);
    }
    if response.instances.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "{:<28} {:<8} {:<8} {:>6} {:>6} {:>10} {:>10}",
        "INSTANCE", "TYPE", "STATUS", "TASKS", "CPU", "MEMORY", "UPTIME"
    );
    let now = Utc::now();
    for i in &response.instances {
        let uptime = (now - i.start_time).to_std().unwrap_or_default();
        println!(
            "{:<28} {:<8} {:<8} {:>6} {:>5.1}% {:>10} {:>10}",
            i.instance_id,
            i.instance_type.as_str(),
            i.status.as_str(),
            format!("{}/{}", i.active_tasks, i.concurrency),
            i.cpu_usage,
            format_bytes(i.memory_usage),
            format_duration(uptime)
        );
    }
    Ok(())
}

pub async fn instance(api: &ApiClient, id: &str) -> Result<()> {
    let i: InstanceInfo = api.get(&format!("api/v1/instances/{}", id), &[]).await?;
    let now = Utc::now();

    println!("Instance:       {}", i.instance_id);
    println!("Type:           {}", i.instance_type);
    println!("Host:           {} (pid {})", i.hostname, i.pid);
    println!("Version:        {}", i.version);
    println!("Status:         {}", i.status);
    println!("Last heartbeat: {} ago", format_duration(i.heartbeat_age(now)));
    println!(
        "Uptime:         {}",
        format_duration((now - i.start_time).to_std().unwrap_or_default())
    );
    println!("Tasks:          {}/{}", i.active_tasks, i.concurrency);
    println!("CPU:            {:.1}%", i.cpu_usage);
    println!(
        "Memory:         {} / {}",
        format_bytes(i.memory_usage),
        format_bytes(i.memory_total)
    );
    println!(
        "Disk:           {} / {}",
        format_bytes(i.disk_usage),
        format_bytes(i.disk_total)
    );
    Ok(())
}

async fn registry(config_path: &Path) -> Result<(FleetRegistry, irgsh_config::SystemConfig)> {
    let config = load_system_config(config_path)?;
    let store = RedisFleetStore::connect(config.redis_url.as_str()).await?;
    let registry = FleetRegistry::new(Arc::new(store), config.monitoring.thresholds);
    Ok((registry, config))
}

pub async fn heartbeat(
    config_path: &Path,
    instance_type: InstanceType,
    workdir: PathBuf,
    concurrency: u32,
    hostname: Option<String>,
) -> Result<()> {
    let (registry, config) = registry(config_path).await?;

    let mut heartbeat = Heartbeat::new(registry, instance_type, workdir)
        .with_interval(config.monitoring.heartbeat_interval)
        .with_concurrency(concurrency);
    if let Some(hostname) = hostname {
        heartbeat = heartbeat.with_hostname(hostname);
    }
    info!(instance_id = %heartbeat.instance_id(), "Reporting to fleet registry");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        signal.cancel();
    });

    heartbeat.run(shutdown).await;
    Ok(())
}

pub async fn janitor(config_path: &Path) -> Result<()> {
    let (registry, config) = registry(config_path).await?;
    let report = Janitor::new(registry, config.monitoring.cleanup_interval)
        .run_once()
        .await?;
    println!(
        "Removed {} instances ({} expired, {} timed out)",
        report.removed(),
        report.expired,
        report.timed_out
    );
    Ok(())
}
