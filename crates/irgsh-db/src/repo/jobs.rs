//! Package pipeline job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use irgsh_core::TaskUuid;
use irgsh_core::job::JobInfo;
use irgsh_core::pipeline::{PipelineState, Stage, TaskState};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use super::{DEFAULT_RECENT_LIMIT, TERMINAL_STATES_SQL};
use crate::{DbError, DbResult};

const JOB_COLUMNS: &str = "task_uuid, package_name, package_version, maintainer, component, \
     is_experimental, submitted_at, state, current_stage, build_state, repo_state, \
     package_url, source_url, package_branch, source_branch";

/// A `jobs` row as stored.
#[derive(Debug, sqlx::FromRow)]
struct JobRecord {
    task_uuid: String,
    package_name: String,
    package_version: String,
    maintainer: String,
    component: String,
    is_experimental: bool,
    submitted_at: DateTime<Utc>,
    state: String,
    current_stage: String,
    build_state: String,
    repo_state: String,
    package_url: String,
    source_url: String,
    package_branch: String,
    source_branch: String,
}

impl TryFrom<JobRecord> for JobInfo {
    type Error = DbError;

    fn try_from(row: JobRecord) -> DbResult<Self> {
        let corrupt = |e: irgsh_core::Error| DbError::Corrupt(format!("job {}: {}", row.task_uuid, e));

        Ok(JobInfo {
            task_uuid: TaskUuid::parse(&row.task_uuid).map_err(corrupt)?,
            state: row.state.parse::<PipelineState>().map_err(corrupt)?,
            current_stage: row.current_stage.parse::<Stage>().map_err(corrupt)?,
            build_state: optional_state(&row.build_state).map_err(corrupt)?,
            repo_state: optional_state(&row.repo_state).map_err(corrupt)?,
            package_name: row.package_name,
            package_version: row.package_version,
            maintainer: row.maintainer,
            component: row.component,
            is_experimental: row.is_experimental,
            submitted_at: row.submitted_at,
            package_url: row.package_url,
            source_url: row.source_url,
            package_branch: row.package_branch,
            source_branch: row.source_branch,
        })
    }
}

fn optional_state(raw: &str) -> irgsh_core::Result<Option<TaskState>> {
    if raw.is_empty() {
        Ok(None)
    } else {
        raw.parse().map(Some)
    }
}

fn state_column(state: Option<TaskState>) -> &'static str {
    state.map(|s| s.as_str()).unwrap_or("")
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Insert a job, or overwrite the mutable fields of an existing one.
    ///
    /// `submitted_at` of an existing row is kept. Rows already in a
    /// terminal state are left as they are.
    async fn record_job(&self, job: &JobInfo) -> DbResult<()>;

    async fn get_job(&self, uuid: &TaskUuid) -> DbResult<JobInfo>;

    /// Most recently submitted jobs first. A zero limit means the default.
    async fn recent_jobs(&self, limit: usize) -> DbResult<Vec<JobInfo>>;

    /// Set the pipeline state unless the job is already terminal.
    ///
    /// Returns whether a row was changed.
    async fn update_job_state(&self, uuid: &TaskUuid, state: PipelineState) -> DbResult<bool>;

    /// Set stage progress unless the job is already terminal.
    ///
    /// Returns whether a row was changed.
    async fn update_job_stages(
        &self,
        uuid: &TaskUuid,
        current_stage: Stage,
        build_state: TaskState,
        repo_state: TaskState,
    ) -> DbResult<bool>;
}

/// SQLite implementation of JobRepo.
pub struct SqliteJobRepo {
    pool: SqlitePool,
    max_jobs: usize,
}

impl SqliteJobRepo {
    pub fn new(pool: SqlitePool, max_jobs: usize) -> Self {
        Self {
            pool,
            max_jobs: max_jobs.max(1),
        }
    }

    /// Keep only the `max_jobs` most recent rows.
    async fn prune(&self) {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs WHERE id NOT IN (
                SELECT id FROM jobs ORDER BY submitted_at DESC, id DESC LIMIT ?
            )
            "#,
        )
        .bind(self.max_jobs as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => {
                debug!(pruned = done.rows_affected(), max_jobs = self.max_jobs, "Pruned old jobs");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to prune old jobs"),
        }
    }
}

#[async_trait]
impl JobRepo for SqliteJobRepo {
    async fn record_job(&self, job: &JobInfo) -> DbResult<()> {
        let query = format!(
            r#"
            INSERT INTO jobs ({JOB_COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_uuid) DO UPDATE SET
                package_name = excluded.package_name,
                package_version = excluded.package_version,
                maintainer = excluded.maintainer,
                component = excluded.component,
                is_experimental = excluded.is_experimental,
                state = excluded.state,
                current_stage = excluded.current_stage,
                build_state = excluded.build_state,
                repo_state = excluded.repo_state,
                package_url = excluded.package_url,
                source_url = excluded.source_url,
                package_branch = excluded.package_branch,
                source_branch = excluded.source_branch,
                updated_at = CURRENT_TIMESTAMP
            WHERE jobs.state NOT IN {TERMINAL_STATES_SQL}
            "#
        );

        sqlx::query(&query)
            .bind(job.task_uuid.as_str())
            .bind(&job.package_name)
            .bind(&job.package_version)
            .bind(&job.maintainer)
            .bind(&job.component)
            .bind(job.is_experimental)
            .bind(job.submitted_at)
            .bind(job.state.as_str())
            .bind(job.current_stage.as_str())
            .bind(state_column(job.build_state))
            .bind(state_column(job.repo_state))
            .bind(&job.package_url)
            .bind(&job.source_url)
            .bind(&job.package_branch)
            .bind(&job.source_branch)
            .execute(&self.pool)
            .await?;

        self.prune().await;
        Ok(())
    }

    async fn get_job(&self, uuid: &TaskUuid) -> DbResult<JobInfo> {
        let row = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE task_uuid = ?"
        ))
        .bind(uuid.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("job {}", uuid)))?;
        row.try_into()
    }

    async fn recent_jobs(&self, limit: usize) -> DbResult<Vec<JobInfo>> {
        let limit = if limit == 0 { DEFAULT_RECENT_LIMIT } else { limit };
        let rows = sqlx::query_as::<_, JobRecord>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY submitted_at DESC, id DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                JobInfo::try_from(row)
                    .inspect_err(|e| warn!(error = %e, "Skipping unreadable job row"))
                    .ok()
            })
            .collect())
    }

    async fn update_job_state(&self, uuid: &TaskUuid, state: PipelineState) -> DbResult<bool> {
        let done = sqlx::query(&format!(
            "UPDATE jobs SET state = ?, updated_at = CURRENT_TIMESTAMP \
             WHERE task_uuid = ? AND state NOT IN {TERMINAL_STATES_SQL}"
        ))
        .bind(state.as_str())
        .bind(uuid.as_str())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn update_job_stages(
        &self,
        uuid: &TaskUuid,
        current_stage: Stage,
        build_state: TaskState,
        repo_state: TaskState,
    ) -> DbResult<bool> {
        let done = sqlx::query(&format!(
            "UPDATE jobs SET current_stage = ?, build_state = ?, repo_state = ?, \
             updated_at = CURRENT_TIMESTAMP \
             WHERE task_uuid = ? AND state NOT IN {TERMINAL_STATES_SQL}"
        ))
        .bind(current_stage.as_str())
        .bind(build_state.as_str())
        .bind(repo_state.as_str())
        .bind(uuid.as_str())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }
}
