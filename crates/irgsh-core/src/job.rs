//! Durable job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{PipelineState, Stage, StageStates, TaskState};
use crate::submission::Submission;
use crate::TaskUuid;

/// Metadata of one package pipeline, as kept in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub task_uuid: TaskUuid,
    pub package_name: String,
    pub package_version: String,
    pub maintainer: String,
    pub component: String,
    pub is_experimental: bool,
    pub submitted_at: DateTime<Utc>,
    pub state: PipelineState,
    pub current_stage: Stage,
    /// Last observed state of the build signature; `None` until polled.
    pub build_state: Option<TaskState>,
    /// Last observed state of the repo signature; `None` until polled.
    pub repo_state: Option<TaskState>,
    pub package_url: String,
    pub source_url: String,
    pub package_branch: String,
    pub source_branch: String,
}

impl JobInfo {
    /// A freshly admitted pipeline that no worker has picked up yet.
    pub fn pending(task_uuid: TaskUuid, submission: &Submission, submitted_at: DateTime<Utc>) -> Self {
        Self {
            task_uuid,
            package_name: submission.package_name.clone(),
            package_version: submission.package_version.clone(),
            maintainer: submission.maintainer.clone(),
            component: submission.component.clone(),
            is_experimental: submission.is_experimental,
            submitted_at,
            state: PipelineState::Pending,
            current_stage: Stage::Build,
            build_state: None,
            repo_state: None,
            package_url: submission.package_url.clone(),
            source_url: submission.source_url.clone(),
            package_branch: submission.package_branch.clone(),
            source_branch: submission.source_branch.clone(),
        }
    }

    /// Same package metadata under a new pipeline id, reset to PENDING.
    pub fn resubmitted(&self, task_uuid: TaskUuid, submitted_at: DateTime<Utc>) -> Self {
        Self {
            task_uuid,
            submitted_at,
            state: PipelineState::Pending,
            current_stage: Stage::Build,
            build_state: None,
            repo_state: None,
            ..self.clone()
        }
    }
}

/// A recent pipeline with live stage states and a display label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: JobInfo,
    pub label: String,
}

impl JobView {
    /// Re-derive state and stage from live stage states.
    pub fn from_live(mut job: JobInfo, states: StageStates, now: DateTime<Utc>) -> Self {
        job.state = states.pipeline_state();
        job.current_stage = states.current_stage();
        job.build_state = Some(states.build);
        job.repo_state = Some(states.repo);
        let label = states.status_label(job.submitted_at, now);
        Self { job, label }
    }

    /// View of a job whose stored record is final.
    ///
    /// Stage states are re-labelled when they were captured; a job that
    /// failed before any stage was polled is labelled with its state.
    pub fn from_stored(job: JobInfo, now: DateTime<Utc>) -> Self {
        match (job.build_state, job.repo_state) {
            (Some(build), Some(repo)) => {
                let label = StageStates::new(build, repo).status_label(job.submitted_at, now);
                Self { job, label }
            }
            _ => {
                let label = job.state.as_str().to_string();
                Self { job, label }
            }
        }
    }
}

/// Metadata of one standalone ISO build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsoJobInfo {
    pub task_uuid: TaskUuid,
    pub repo_url: String,
    pub branch: String,
    pub submitted_at: DateTime<Utc>,
    pub state: TaskState,
}
