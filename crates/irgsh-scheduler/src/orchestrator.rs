//! Pipeline usecase: admission, status, listing, retry and ISO builds.

use std::sync::Arc;

use chrono::Utc;
use irgsh_core::artifact::{SignatureVerifier, SubmissionStorage};
use irgsh_core::job::{IsoJobInfo, JobInfo, JobView};
use irgsh_core::pipeline::{PipelineState, Stage, StageStates, TaskState};
use irgsh_core::queue::{
    BUILD_TASK, Chain, ISO_TASK, IsoPayload, REPO_TASK, Signature, TaskPayload, TaskQueue,
};
use irgsh_core::submission::{BuildPayload, Submission};
use irgsh_core::{Error, Result, TaskUuid};
use irgsh_db::{IsoJobRepo, JobRepo};
use serde::Serialize;
use tracing::{error, info, warn};

/// Leading bytes of every gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Live status of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub pipeline_id: TaskUuid,
    pub state: PipelineState,
    pub current_stage: Stage,
    pub build_state: TaskState,
    pub repo_state: TaskState,
}

impl PipelineStatus {
    fn new(pipeline_id: TaskUuid, states: StageStates) -> Self {
        Self {
            pipeline_id,
            state: states.pipeline_state(),
            current_stage: states.current_stage(),
            build_state: states.build,
            repo_state: states.repo,
        }
    }
}

/// Drives package pipelines through the task queue.
///
/// Job tracking is optional: without the job repositories, submissions
/// and status still work but listing and retry report Unavailable.
pub struct PipelineOrchestrator {
    queue: Arc<dyn TaskQueue>,
    storage: Arc<dyn SubmissionStorage>,
    verifier: Arc<dyn SignatureVerifier>,
    jobs: Option<Arc<dyn JobRepo>>,
    iso_jobs: Option<Arc<dyn IsoJobRepo>>,
}

impl PipelineOrchestrator {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        storage: Arc<dyn SubmissionStorage>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            queue,
            storage,
            verifier,
            jobs: None,
            iso_jobs: None,
        }
    }

    /// Persist pipelines and ISO builds in the given repositories.
    pub fn with_job_tracking(mut self, jobs: Arc<dyn JobRepo>, iso_jobs: Arc<dyn IsoJobRepo>) -> Self {
        self.jobs = Some(jobs);
        self.iso_jobs = Some(iso_jobs);
        self
    }

    pub fn job_tracking_enabled(&self) -> bool {
        self.jobs.is_some()
    }

    fn job_repo(&self) -> Result<&Arc<dyn JobRepo>> {
        self.jobs
            .as_ref()
            .ok_or_else(|| Error::Unavailable("job tracking is not enabled".to_string()))
    }

    fn iso_job_repo(&self) -> Result<&Arc<dyn IsoJobRepo>> {
        self.iso_jobs
            .as_ref()
            .ok_or_else(|| Error::Unavailable("job tracking is not enabled".to_string()))
    }

    /// Store an uploaded bundle for a later submission.
    ///
    /// The token must carry a valid maintainer signature and the blob must
    /// be gzip data. Returns the upload id that `Submission::tarball` names.
    pub async fn upload_submission(&self, token: &[u8], blob: &[u8]) -> Result<String> {
        if token.is_empty() {
            return Err(Error::Validation("token is required".to_string()));
        }
        if !blob.starts_with(&GZIP_MAGIC) {
            warn!(bytes = blob.len(), "Upload rejected: not a gzip bundle");
            return Err(Error::Validation("blob must be a tar.gz bundle".to_string()));
        }

        let upload_id = TaskUuid::random().to_string();
        let token_path = self.storage.store_upload(&upload_id, token, blob).await?;

        if let Err(e) = self.verifier.verify_token(&token_path).await {
            warn!(upload_id, error = %e, "Upload token rejected");
            if let Err(cleanup) = self.storage.discard_upload(&upload_id).await {
                warn!(upload_id, error = %cleanup, "Failed to discard rejected upload");
            }
            return Err(e);
        }

        info!(upload_id, bytes = blob.len(), "Submission uploaded");
        Ok(upload_id)
    }

    /// Admit a package submission and queue its build-then-repo chain.
    ///
    /// The returned id can be queried right away; its stages read as
    /// PENDING until a worker picks the chain up.
    pub async fn submit_package(&self, submission: Submission) -> Result<TaskUuid> {
        submission.validate()?;

        let now = Utc::now();
        let uuid = TaskUuid::mint_at(now, &submission.maintainer_fingerprint, &submission.package_name);

        let dir = self
            .storage
            .admit_upload(&submission.tarball, &uuid)
            .await
            .inspect_err(|e| error!(task_uuid = %uuid, error = %e, "Failed to admit upload"))?;

        if let Err(e) = self.verifier.verify_submission(&dir).await {
            warn!(task_uuid = %uuid, error = %e, "Submission rejected");
            return Err(e);
        }

        let job = JobInfo::pending(uuid.clone(), &submission, now);
        let chain = Chain::package_pipeline(BuildPayload::new(uuid.clone(), now, submission));
        self.dispatch(&job, chain).await?;

        info!(
            task_uuid = %uuid,
            package = %job.package_name,
            version = %job.package_version,
            "Pipeline submitted"
        );
        Ok(uuid)
    }

    /// Record the job as PENDING, then enqueue its chain.
    ///
    /// A record failure is logged only. An enqueue failure marks the
    /// recorded job FAILED and is returned.
    async fn dispatch(&self, job: &JobInfo, chain: Chain) -> Result<()> {
        if let Some(jobs) = &self.jobs {
            if let Err(e) = jobs.record_job(job).await {
                warn!(task_uuid = %job.task_uuid, error = %e, "Failed to record job");
            }
        }

        if let Err(e) = self.queue.send_chain(chain).await {
            error!(task_uuid = %job.task_uuid, error = %e, "Failed to enqueue pipeline");
            if let Some(jobs) = &self.jobs {
                if let Err(e) = jobs.update_job_state(&job.task_uuid, PipelineState::Failed).await {
                    warn!(task_uuid = %job.task_uuid, error = %e, "Failed to mark job as failed");
                }
            }
            return Err(Error::Internal(format!(
                "failed to enqueue pipeline {}: {}",
                job.task_uuid, e
            )));
        }
        Ok(())
    }

    async fn stage_states(&self, uuid: &TaskUuid) -> Result<StageStates> {
        let build = self.queue.task_state(uuid, BUILD_TASK).await?;
        let repo = self.queue.task_state(uuid, REPO_TASK).await?;
        Ok(StageStates::new(build, repo))
    }

    async fn write_back(jobs: &dyn JobRepo, uuid: &TaskUuid, states: StageStates) {
        if let Err(e) = jobs
            .update_job_stages(uuid, states.current_stage(), states.build, states.repo)
            .await
        {
            warn!(task_uuid = %uuid, error = %e, "Failed to store stage states");
        }
        if let Err(e) = jobs.update_job_state(uuid, states.pipeline_state()).await {
            warn!(task_uuid = %uuid, error = %e, "Failed to store pipeline state");
        }
    }

    /// Derive the pipeline state from live stage states.
    ///
    /// With job tracking enabled, the stored job is refreshed as well.
    pub async fn pipeline_status(&self, uuid: &TaskUuid) -> Result<PipelineStatus> {
        let states = self.stage_states(uuid).await?;
        if let Some(jobs) = &self.jobs {
            Self::write_back(jobs.as_ref(), uuid, states).await;
        }
        Ok(PipelineStatus::new(uuid.clone(), states))
    }

    /// Most recent pipelines, newest first.
    ///
    /// Jobs still in flight are re-derived from live stage states; final
    /// ones are shown as stored, since their task states may have expired
    /// from the broker.
    pub async fn recent_pipelines(&self, limit: usize) -> Result<Vec<JobView>> {
        let jobs = self.job_repo()?;
        let records = jobs.recent_jobs(limit).await?;
        let now = Utc::now();

        let mut views = Vec::with_capacity(records.len());
        for job in records {
            if job.state.is_terminal() {
                views.push(JobView::from_stored(job, now));
                continue;
            }

            match self.stage_states(&job.task_uuid).await {
                Ok(states) => {
                    Self::write_back(jobs.as_ref(), &job.task_uuid, states).await;
                    views.push(JobView::from_live(job, states, now));
                }
                Err(e) => {
                    warn!(task_uuid = %job.task_uuid, error = %e, "Failed to read stage states");
                    views.push(JobView::from_stored(job, now));
                }
            }
        }
        Ok(views)
    }

    /// Run a recorded pipeline again under a new id.
    ///
    /// The original job is left as it is; the new pipeline keeps its
    /// maintainer fingerprint and package name.
    pub async fn retry_pipeline(&self, old: &TaskUuid) -> Result<TaskUuid> {
        let jobs = self.job_repo()?;
        let original = jobs.get_job(old).await?;
        let fingerprint = old.fingerprint().ok_or_else(|| {
            Error::Validation(format!("pipeline id {} carries no maintainer fingerprint", old))
        })?;

        let now = Utc::now();
        let uuid = TaskUuid::mint_at(now, fingerprint, &original.package_name);

        if !self.storage.tarball_exists(old).await? {
            warn!(task_uuid = %old, "Original submission bundle is gone");
            return Err(Error::NotFound(format!(
                "submission bundle of {}, cannot retry",
                old
            )));
        }

        info!(old = %old, task_uuid = %uuid, "Copying submission for retry");
        self.storage
            .copy_submission(old, &uuid)
            .await
            .map_err(|e| Error::Internal(format!("failed to copy submission for retry: {}", e)))?;
        if let Err(e) = self.storage.reclaim_ownership(&uuid).await {
            warn!(task_uuid = %uuid, error = %e, "Failed to reclaim submission ownership");
        }

        let job = original.resubmitted(uuid.clone(), now);
        let submission = resubmission(&job, fingerprint);
        let chain = Chain::package_pipeline(BuildPayload::new(uuid.clone(), now, submission));
        self.dispatch(&job, chain).await?;

        info!(old = %old, task_uuid = %uuid, "Pipeline retried");
        Ok(uuid)
    }

    /// Queue a standalone ISO build.
    pub async fn build_iso(&self, payload: IsoPayload) -> Result<TaskUuid> {
        let uuid = TaskUuid::random();
        let now = Utc::now();

        let signature = Signature::new(uuid.clone(), TaskPayload::Iso(payload.clone()));
        if let Err(e) = self.queue.send_task(signature).await {
            error!(task_uuid = %uuid, error = %e, "Failed to enqueue ISO build");
            return Err(Error::Internal(format!("failed to enqueue ISO build: {}", e)));
        }

        if let Some(iso_jobs) = &self.iso_jobs {
            let job = IsoJobInfo {
                task_uuid: uuid.clone(),
                repo_url: payload.repo_url,
                branch: payload.branch,
                submitted_at: now,
                state: TaskState::Pending,
            };
            if let Err(e) = iso_jobs.record_iso_job(&job).await {
                warn!(task_uuid = %uuid, error = %e, "Failed to record ISO job");
            }
        }

        info!(task_uuid = %uuid, "ISO build queued");
        Ok(uuid)
    }

    /// Most recent ISO builds, newest first, refreshed from the broker
    /// while still in flight.
    pub async fn recent_iso_jobs(&self, limit: usize) -> Result<Vec<IsoJobInfo>> {
        let iso_jobs = self.iso_job_repo()?;
        let mut records = iso_jobs.recent_iso_jobs(limit).await?;

        for job in records.iter_mut().filter(|job| !job.state.is_terminal()) {
            match self.queue.task_state(&job.task_uuid, ISO_TASK).await {
                Ok(state) if state != job.state => {
                    if let Err(e) = iso_jobs.update_iso_job_state(&job.task_uuid, state).await {
                        warn!(task_uuid = %job.task_uuid, error = %e, "Failed to store ISO state");
                    }
                    job.state = state;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(task_uuid = %job.task_uuid, error = %e, "Failed to read ISO state");
                }
            }
        }
        Ok(records)
    }
}

/// Submission carried by the build payload of a retried pipeline.
fn resubmission(job: &JobInfo, fingerprint: &str) -> Submission {
    Submission {
        package_name: job.package_name.clone(),
        package_version: job.package_version.clone(),
        package_url: job.package_url.clone(),
        source_url: job.source_url.clone(),
        maintainer: job.maintainer.clone(),
        maintainer_fingerprint: fingerprint.to_string(),
        component: job.component.clone(),
        is_experimental: job.is_experimental,
        package_branch: job.package_branch.clone(),
        source_branch: job.source_branch.clone(),
        ..Default::default()
    }
}
