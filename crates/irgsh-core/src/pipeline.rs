//! Pipeline and stage states, and the derivation of one from the other.
//!
//! A pipeline is two task-queue signatures sharing one [`TaskUuid`]:
//! "build" then "repo". Their states are polled independently and folded
//! into a single pipeline state here. Every read path (live status, job
//! listings) goes through [`StageStates`], so the precedence rules exist
//! exactly once.
//!
//! [`TaskUuid`]: crate::TaskUuid

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Pending pipelines older than this are labelled STALLED for display.
pub const STALL_AFTER_SECS: i64 = 24 * 60 * 60;

/// State of a single task-queue signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Received,
    Started,
    Retry,
    Success,
    Failure,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Received => "RECEIVED",
            TaskState::Started => "STARTED",
            TaskState::Retry => "RETRY",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }

    /// Queued or running, but not finished.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TaskState::Pending | TaskState::Received | TaskState::Started
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskState::Pending),
            "RECEIVED" => Ok(TaskState::Received),
            "STARTED" => Ok(TaskState::Started),
            "RETRY" => Ok(TaskState::Retry),
            "SUCCESS" => Ok(TaskState::Success),
            "FAILURE" => Ok(TaskState::Failure),
            other => Err(Error::Validation(format!("unknown task state: {}", other))),
        }
    }
}

/// Overall state of a pipeline.
///
/// Before the build stage succeeds the pipeline mirrors the build task
/// state, so every [`TaskState`] has a counterpart here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Pending,
    Received,
    Started,
    Retry,
    Success,
    Failure,
    /// Build succeeded, repo stage queued or running.
    Repo,
    /// Both stages succeeded.
    Done,
    /// One of the stages failed.
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Pending => "PENDING",
            PipelineState::Received => "RECEIVED",
            PipelineState::Started => "STARTED",
            PipelineState::Retry => "RETRY",
            PipelineState::Success => "SUCCESS",
            PipelineState::Failure => "FAILURE",
            PipelineState::Repo => "REPO",
            PipelineState::Done => "DONE",
            PipelineState::Failed => "FAILED",
        }
    }

    /// Terminal states are never overwritten once persisted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Success
                | PipelineState::Done
                | PipelineState::Failure
                | PipelineState::Failed
        )
    }

    /// All terminal states, in their persisted spelling.
    pub fn terminal_names() -> [&'static str; 4] {
        ["SUCCESS", "DONE", "FAILURE", "FAILED"]
    }
}

impl From<TaskState> for PipelineState {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::Pending => PipelineState::Pending,
            TaskState::Received => PipelineState::Received,
            TaskState::Started => PipelineState::Started,
            TaskState::Retry => PipelineState::Retry,
            TaskState::Success => PipelineState::Success,
            TaskState::Failure => PipelineState::Failure,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REPO" => Ok(PipelineState::Repo),
            "DONE" => Ok(PipelineState::Done),
            "FAILED" => Ok(PipelineState::Failed),
            other => TaskState::from_str(other)
                .map(PipelineState::from)
                .map_err(|_| Error::Validation(format!("unknown pipeline state: {}", other))),
        }
    }
}

/// Which stage a pipeline is currently in, for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Build,
    Repo,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Repo => "repo",
            Stage::Completed => "completed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Stage::Build),
            "repo" => Ok(Stage::Repo),
            "completed" => Ok(Stage::Completed),
            other => Err(Error::Validation(format!("unknown stage: {}", other))),
        }
    }
}

/// The two independently polled stage states of one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStates {
    pub build: TaskState,
    pub repo: TaskState,
}

impl StageStates {
    pub fn new(build: TaskState, repo: TaskState) -> Self {
        Self { build, repo }
    }

    /// Overall pipeline state; the first matching rule wins.
    pub fn pipeline_state(&self) -> PipelineState {
        use TaskState::*;

        match (self.build, self.repo) {
            (Failure, _) => PipelineState::Failed,
            (Success, Success) => PipelineState::Done,
            (Success, Failure) => PipelineState::Failed,
            (Success, Pending | Received | Started) => PipelineState::Repo,
            (build, _) => build.into(),
        }
    }

    /// Current stage, reported independently of the pipeline state.
    pub fn current_stage(&self) -> Stage {
        use TaskState::*;

        match (self.build, self.repo) {
            (Failure, _) => Stage::Build,
            (Success, Pending | Started) => Stage::Repo,
            (Success, Success) => Stage::Completed,
            (Success, Failure) => Stage::Repo,
            _ => Stage::Build,
        }
    }

    /// Human-facing label for listings.
    ///
    /// Purely presentational: a pipeline pending for longer than
    /// [`STALL_AFTER_SECS`] reads as STALLED, failures name the failing
    /// stage. Nothing persisted ever carries these labels.
    pub fn status_label(&self, submitted_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let state = self.pipeline_state();
        match state {
            PipelineState::Failed if self.build == TaskState::Failure => {
                "FAILED (build)".to_string()
            }
            PipelineState::Failed => "FAILED (repo)".to_string(),
            PipelineState::Started => format!("STARTED ({})", self.current_stage()),
            PipelineState::Pending
                if (now - submitted_at).num_seconds() > STALL_AFTER_SECS =>
            {
                "STALLED".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use TaskState::*;

    fn states(build: TaskState, repo: TaskState) -> StageStates {
        StageStates::new(build, repo)
    }

    #[test]
    fn test_build_failure_fails_pipeline_whatever_repo_says() {
        for repo in [Pending, Received, Started, Retry, Success, Failure] {
            assert_eq!(states(Failure, repo).pipeline_state(), PipelineState::Failed);
            assert_eq!(states(Failure, repo).current_stage(), Stage::Build);
        }
    }

    #[test]
    fn test_both_succeeded_is_done() {
        assert_eq!(states(Success, Success).pipeline_state(), PipelineState::Done);
        assert_eq!(states(Success, Success).current_stage(), Stage::Completed);
    }

    #[test]
    fn test_repo_failure_fails_pipeline() {
        assert_eq!(states(Success, Failure).pipeline_state(), PipelineState::Failed);
        assert_eq!(states(Success, Failure).current_stage(), Stage::Repo);
    }

    #[test]
    fn test_repo_in_flight_is_repo() {
        assert_eq!(states(Success, Pending).pipeline_state(), PipelineState::Repo);
        assert_eq!(states(Success, Received).pipeline_state(), PipelineState::Repo);
        assert_eq!(states(Success, Started).pipeline_state(), PipelineState::Repo);
    }

    #[test]
    fn test_current_stage_received_repo_still_reads_build() {
        assert_eq!(states(Success, Pending).current_stage(), Stage::Repo);
        assert_eq!(states(Success, Started).current_stage(), Stage::Repo);
        assert_eq!(states(Success, Received).current_stage(), Stage::Build);
    }

    #[test]
    fn test_otherwise_mirrors_build_state() {
        assert_eq!(states(Pending, Pending).pipeline_state(), PipelineState::Pending);
        assert_eq!(states(Started, Pending).pipeline_state(), PipelineState::Started);
        assert_eq!(states(Received, Pending).pipeline_state(), PipelineState::Received);
        assert_eq!(states(Retry, Pending).pipeline_state(), PipelineState::Retry);
        assert_eq!(states(Success, Retry).pipeline_state(), PipelineState::Success);
        assert_eq!(states(Started, Pending).current_stage(), Stage::Build);
    }

    #[test]
    fn test_terminal_states() {
        assert!(PipelineState::Done.is_terminal());
        assert!(PipelineState::Failed.is_terminal());
        assert!(PipelineState::Success.is_terminal());
        assert!(PipelineState::Failure.is_terminal());
        assert!(!PipelineState::Repo.is_terminal());
        assert!(!PipelineState::Pending.is_terminal());
    }

    #[test]
    fn test_state_strings_round_trip() {
        for state in [
            PipelineState::Pending,
            PipelineState::Repo,
            PipelineState::Done,
            PipelineState::Failed,
            PipelineState::Failure,
        ] {
            assert_eq!(state.as_str().parse::<PipelineState>().unwrap(), state);
        }
        assert!("BOGUS".parse::<PipelineState>().is_err());
        assert_eq!(
            serde_json::to_string(&PipelineState::Repo).unwrap(),
            "\"REPO\""
        );
    }

    #[test]
    fn test_status_labels() {
        let now = Utc::now();
        let fresh = now - Duration::minutes(5);
        let old = now - Duration::hours(25);

        assert_eq!(states(Pending, Pending).status_label(fresh, now), "PENDING");
        assert_eq!(states(Pending, Pending).status_label(old, now), "STALLED");
        assert_eq!(states(Failure, Pending).status_label(fresh, now), "FAILED (build)");
        assert_eq!(states(Success, Failure).status_label(fresh, now), "FAILED (repo)");
        assert_eq!(states(Started, Pending).status_label(fresh, now), "STARTED (build)");
        assert_eq!(states(Success, Started).status_label(old, now), "REPO");
        assert_eq!(states(Success, Success).status_label(old, now), "DONE");
    }
}
