//! ISO build job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use irgsh_core::TaskUuid;
use irgsh_core::job::IsoJobInfo;
use irgsh_core::pipeline::TaskState;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use super::{DEFAULT_RECENT_LIMIT, TERMINAL_STATES_SQL};
use crate::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct IsoJobRecord {
    task_uuid: String,
    repo_url: String,
    branch: String,
    submitted_at: DateTime<Utc>,
    state: String,
}

impl TryFrom<IsoJobRecord> for IsoJobInfo {
    type Error = DbError;

    fn try_from(row: IsoJobRecord) -> DbResult<Self> {
        let corrupt =
            |e: irgsh_core::Error| DbError::Corrupt(format!("iso job {}: {}", row.task_uuid, e));

        Ok(IsoJobInfo {
            task_uuid: TaskUuid::parse(&row.task_uuid).map_err(corrupt)?,
            state: row.state.parse::<TaskState>().map_err(corrupt)?,
            repo_url: row.repo_url,
            branch: row.branch,
            submitted_at: row.submitted_at,
        })
    }
}

#[async_trait]
pub trait IsoJobRepo: Send + Sync {
    /// Insert an ISO job or overwrite a non-terminal existing one.
    async fn record_iso_job(&self, job: &IsoJobInfo) -> DbResult<()>;
    async fn get_iso_job(&self, uuid: &TaskUuid) -> DbResult<IsoJobInfo>;
    async fn recent_iso_jobs(&self, limit: usize) -> DbResult<Vec<IsoJobInfo>>;
    /// Returns whether a row was changed.
    async fn update_iso_job_state(&self, uuid: &TaskUuid, state: TaskState) -> DbResult<bool>;
}

/// SQLite implementation of IsoJobRepo.
pub struct SqliteIsoJobRepo {
    pool: SqlitePool,
    max_jobs: usize,
}

impl SqliteIsoJobRepo {
    pub fn new(pool: SqlitePool, max_jobs: usize) -> Self {
        Self {
            pool,
            max_jobs: max_jobs.max(1),
        }
    }

    async fn prune(&self) {
        let result = sqlx::query(
            r#"
            DELETE FROM iso_jobs WHERE id NOT IN (
                SELECT id FROM iso_jobs ORDER BY submitted_at DESC, id DESC LIMIT ?
            )
            "#,
        )
        .bind(self.max_jobs as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() > 0 => {
                debug!(pruned = done.rows_affected(), "Pruned old ISO jobs");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to prune old ISO jobs"),
        }
    }
}

#[async_trait]
impl IsoJobRepo for SqliteIsoJobRepo {
    async fn record_iso_job(&self, job: &IsoJobInfo) -> DbResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO iso_jobs (task_uuid, repo_url, branch, submitted_at, state)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(task_uuid) DO UPDATE SET
                repo_url = excluded.repo_url,
                branch = excluded.branch,
                state = excluded.state,
                updated_at = CURRENT_TIMESTAMP
            WHERE iso_jobs.state NOT IN {TERMINAL_STATES_SQL}
            "#
        ))
        .bind(job.task_uuid.as_str())
        .bind(&job.repo_url)
        .bind(&job.branch)
        .bind(job.submitted_at)
        .bind(job.state.as_str())
        .execute(&self.pool)
        .await?;

        self.prune().await;
        Ok(())
    }

    async fn get_iso_job(&self, uuid: &TaskUuid) -> DbResult<IsoJobInfo> {
        let row = sqlx::query_as::<_, IsoJobRecord>(
            "SELECT task_uuid, repo_url, branch, submitted_at, state FROM iso_jobs WHERE task_uuid = ?",
        )
        .bind(uuid.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("iso job {}", uuid)))?;
        row.try_into()
    }

    async fn recent_iso_jobs(&self, limit: usize) -> DbResult<Vec<IsoJobInfo>> {
        let limit = if limit == 0 { DEFAULT_RECENT_LIMIT } else { limit };
        let rows = sqlx::query_as::<_, IsoJobRecord>(
            "SELECT task_uuid, repo_url, branch, submitted_at, state FROM iso_jobs \
             ORDER BY submitted_at DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                IsoJobInfo::try_from(row)
                    .inspect_err(|e| warn!(error = %e, "Skipping unreadable ISO job row"))
                    .ok()
            })
            .collect())
    }

    async fn update_iso_job_state(&self, uuid: &TaskUuid, state: TaskState) -> DbResult<bool> {
        let done = sqlx::query(&format!(
            "UPDATE iso_jobs SET state = ?, updated_at = CURRENT_TIMESTAMP \
             WHERE task_uuid = ? AND state NOT IN {TERMINAL_STATES_SQL}"
        ))
        .bind(state.as_str())
        .bind(uuid.as_str())
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }
}
