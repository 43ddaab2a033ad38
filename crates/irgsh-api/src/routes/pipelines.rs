//! Pipeline endpoints.

use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use irgsh_core::TaskUuid;
use irgsh_core::job::{IsoJobInfo, JobView};
use irgsh_core::queue::IsoPayload;
use irgsh_core::submission::Submission;
use irgsh_scheduler::PipelineStatus;

/// Listing size when the request names none.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest accepted submission upload.
const UPLOAD_LIMIT: usize = 512 << 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/submission-upload",
            post(upload_submission).layer(DefaultBodyLimit::max(UPLOAD_LIMIT)),
        )
        .route("/submit", post(submit))
        .route("/status", get(status))
        .route("/retry", get(retry))
        .route("/jobs", get(list_jobs))
        .route("/build-iso", post(build_iso))
        .route("/iso-jobs", get(list_iso_jobs))
}

#[derive(Debug, Deserialize)]
struct UuidQuery {
    uuid: Option<String>,
}

impl UuidQuery {
    fn task_uuid(&self) -> Result<TaskUuid, ApiError> {
        match self.uuid.as_deref().map(str::trim) {
            Some(uuid) if !uuid.is_empty() => Ok(TaskUuid::parse(uuid)?),
            _ => Err(ApiError::BadRequest("uuid is required".to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.filter(|&n| n > 0).unwrap_or(DEFAULT_LIST_LIMIT)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PipelineIdResponse {
    pipeline_id: TaskUuid,
}

#[derive(Debug, Serialize)]
struct IsoBuildResponse {
    #[serde(rename = "taskUUID")]
    task_uuid: TaskUuid,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    id: String,
}

/// Multipart form with a signed `token` part and a gzip `blob` part.
async fn upload_submission(
    State(state): State<AppState>,
    form: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut form = form?;
    let mut token = None;
    let mut blob = None;
    while let Some(field) = form.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("token") => token = Some(field.bytes().await?),
            Some("blob") => blob = Some(field.bytes().await?),
            _ => {}
        }
    }

    let token = token.ok_or_else(|| ApiError::BadRequest("token part is required".to_string()))?;
    let blob = blob.ok_or_else(|| ApiError::BadRequest("blob part is required".to_string()))?;
    let id = state.orchestrator.upload_submission(&token, &blob).await?;
    Ok(Json(UploadResponse { id }))
}

async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<Submission>, JsonRejection>,
) -> Result<Json<PipelineIdResponse>, ApiError> {
    let Json(submission) = payload?;
    let pipeline_id = state.orchestrator.submit_package(submission).await?;
    Ok(Json(PipelineIdResponse { pipeline_id }))
}

async fn status(
    State(state): State<AppState>,
    Query(query): Query<UuidQuery>,
) -> Result<Json<PipelineStatus>, ApiError> {
    let uuid = query.task_uuid()?;
    let status = state.orchestrator.pipeline_status(&uuid).await?;
    Ok(Json(status))
}

async fn retry(
    State(state): State<AppState>,
    Query(query): Query<UuidQuery>,
) -> Result<Json<PipelineIdResponse>, ApiError> {
    let uuid = query.task_uuid()?;
    let pipeline_id = state.orchestrator.retry_pipeline(&uuid).await?;
    Ok(Json(PipelineIdResponse { pipeline_id }))
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let jobs = state.orchestrator.recent_pipelines(query.limit()).await?;
    Ok(Json(jobs))
}

/// The body is optional; an empty one leaves repository and branch to
/// the ISO builder.
async fn build_iso(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<IsoBuildResponse>, ApiError> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        IsoPayload::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid ISO request: {}", e)))?
    };
    let task_uuid = state.orchestrator.build_iso(payload).await?;
    Ok(Json(IsoBuildResponse { task_uuid }))
}

async fn list_iso_jobs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<IsoJobInfo>>, ApiError> {
    let jobs = state.orchestrator.recent_iso_jobs(query.limit()).await?;
    Ok(Json(jobs))
}
