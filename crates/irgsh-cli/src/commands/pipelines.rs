//! Pipeline commands.

use anyhow::Result;
use chrono::{DateTime, Utc};
use irgsh_core::job::{IsoJobInfo, JobView};
use irgsh_core::pipeline::PipelineState;
use irgsh_core::queue::IsoPayload;
use serde::Deserialize;

use super::ApiClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    pipeline_id: String,
    state: PipelineState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineIdResponse {
    pipeline_id: String,
}

#[derive(Debug, Deserialize)]
struct IsoBuildResponse {
    #[serde(rename = "taskUUID")]
    task_uuid: String,
}

fn uuid_query(uuid: &str) -> [(&'static str, String); 1] {
    [("uuid", uuid.to_string())]
}

fn short_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

pub async fn status(api: &ApiClient, uuid: &str) -> Result<()> {
    let status: StatusResponse = api.get("api/v1/status", &uuid_query(uuid)).await?;
    println!("{}  {}", status.pipeline_id, status.state);
    Ok(())
}

pub async fn retry(api: &ApiClient, uuid: &str) -> Result<()> {
    let response: PipelineIdResponse = api.get("api/v1/retry", &uuid_query(uuid)).await?;
    println!("Retried {} as {}", uuid, response.pipeline_id);
    Ok(())
}

pub async fn jobs(api: &ApiClient, limit: usize) -> Result<()> {
    let jobs: Vec<JobView> = api
        .get("api/v1/jobs", &[("limit", limit.to_string())])
        .await?;
    if jobs.is_empty() {
        println!("No pipelines recorded");
        return Ok(());
    }

    println!("{:<17} {:<24} {:<16} {:<16} PIPELINE", "SUBMITTED", "PACKAGE", "VERSION", "STATUS");
    for view in jobs {
        let job = view.job;
        println!(
            "{:<17} {:<24} {:<16} {:<16} {}",
            short_time(job.submitted_at),
            job.package_name,
            job.package_version,
            view.label,
            job.task_uuid
        );
    }
    Ok(())
}

pub async fn iso_jobs(api: &ApiClient, limit: usize) -> Result<()> {
    let jobs: Vec<IsoJobInfo> = api
        .get("api/v1/iso-jobs", &[("limit", limit.to_string())])
        .await?;
    if jobs.is_empty() {
        println!("No ISO builds recorded");
        return Ok(());
    }

    println!("{:<17} {:<10} {:<16} ID", "SUBMITTED", "STATE", "BRANCH");
    for job in jobs {
        println!(
            "{:<17} {:<10} {:<16} {}",
            short_time(job.submitted_at),
            job.state.as_str(),
            job.branch,
            job.task_uuid
        );
    }
    Ok(())
}

pub async fn build_iso(api: &ApiClient, repo_url: Option<String>, branch: Option<String>) -> Result<()> {
    let payload = IsoPayload {
        repo_url: repo_url.unwrap_or_default(),
        branch: branch.unwrap_or_default(),
    };
    let response: IsoBuildResponse = api.post("api/v1/build-iso", &payload).await?;
    println!("ISO build queued as {}", response.task_uuid);
    Ok(())
}
