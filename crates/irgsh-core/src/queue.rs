//! Task-queue client abstraction.
//!
//! The queue backend itself is external; irgsh only sends signatures to it
//! and reads back per-signature state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pipeline::TaskState;
use crate::submission::BuildPayload;
use crate::{Error, Result, TaskUuid};

pub const BUILD_TASK: &str = "build";
pub const REPO_TASK: &str = "repo";
pub const ISO_TASK: &str = "iso";

/// Argument of the "iso" signature.
///
/// Empty fields let the ISO builder fall back to its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsoPayload {
    pub repo_url: String,
    pub branch: String,
}

/// Typed argument of a signature, tagged by task name on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "args", rename_all = "lowercase")]
pub enum TaskPayload {
    Build(BuildPayload),
    Repo,
    Iso(IsoPayload),
}

impl TaskPayload {
    pub fn name(&self) -> &'static str {
        match self {
            TaskPayload::Build(_) => BUILD_TASK,
            TaskPayload::Repo => REPO_TASK,
            TaskPayload::Iso(_) => ISO_TASK,
        }
    }
}

/// One unit of work addressed to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub uuid: TaskUuid,
    #[serde(flatten)]
    pub payload: TaskPayload,
}

impl Signature {
    pub fn new(uuid: TaskUuid, payload: TaskPayload) -> Self {
        Self { uuid, payload }
    }

    pub fn name(&self) -> &'static str {
        self.payload.name()
    }
}

/// Signatures run in order, each only after the previous one succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct Chain(Vec<Signature>);

impl Chain {
    pub fn new(signatures: Vec<Signature>) -> Result<Self> {
        if signatures.is_empty() {
            return Err(Error::Validation("a chain needs at least one signature".to_string()));
        }
        Ok(Self(signatures))
    }

    /// The build-then-repo chain of a package pipeline.
    pub fn package_pipeline(payload: BuildPayload) -> Self {
        let uuid = payload.task_uuid.clone();
        Self(vec![
            Signature::new(uuid.clone(), TaskPayload::Build(payload)),
            Signature::new(uuid, TaskPayload::Repo),
        ])
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.0
    }

    pub fn into_signatures(self) -> Vec<Signature> {
        self.0
    }
}

/// Client side of the task-queue backend.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a whole chain in one step.
    async fn send_chain(&self, chain: Chain) -> Result<()>;

    /// Enqueue a single signature.
    async fn send_task(&self, signature: Signature) -> Result<()>;

    /// State of the signature `name` of pipeline `uuid`.
    ///
    /// Signatures that no worker has reported on yet read as PENDING.
    async fn task_state(&self, uuid: &TaskUuid, name: &str) -> Result<TaskState>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::Submission;
    use chrono::Utc;

    #[test]
    fn test_empty_chain_rejected() {
        assert!(Chain::new(vec![]).is_err());
    }

    #[test]
    fn test_package_pipeline_shares_uuid() {
        let id = TaskUuid::mint("DEADBEEF", "foo");
        let chain = Chain::package_pipeline(BuildPayload::new(
            id.clone(),
            Utc::now(),
            Submission::default(),
        ));

        let names: Vec<_> = chain.signatures().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec![BUILD_TASK, REPO_TASK]);
        assert!(chain.signatures().iter().all(|s| s.uuid == id));
    }

    #[test]
    fn test_signature_wire_shape() {
        let id = TaskUuid::random();
        let sig = Signature::new(
            id.clone(),
            TaskPayload::Iso(IsoPayload {
                repo_url: "https://git.example.org/iso".to_string(),
                branch: "main".to_string(),
            }),
        );
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(json["uuid"], id.as_str());
        assert_eq!(json["name"], "iso");
        assert_eq!(json["args"]["branch"], "main");

        let repo = serde_json::to_value(Signature::new(id, TaskPayload::Repo)).unwrap();
        assert_eq!(repo["name"], "repo");
    }
}
