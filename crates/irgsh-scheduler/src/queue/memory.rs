//! In-process task queue.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use irgsh_core::pipeline::TaskState;
use irgsh_core::queue::{Chain, Signature, TaskQueue};
use irgsh_core::{Result, TaskUuid};

use super::task_state_key;
use crate::error::QueueError;

#[derive(Default)]
struct State {
    sent: Vec<Vec<Signature>>,
    states: HashMap<String, TaskState>,
    unavailable: bool,
}

/// Task queue kept in process memory.
///
/// Nothing consumes the messages; stage states are set by hand with
/// [`MemoryTaskQueue::set_state`].
#[derive(Default)]
pub struct MemoryTaskQueue {
    state: Mutex<State>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a signature state, as a worker would.
    pub fn set_state(&self, uuid: &TaskUuid, name: &str, state: TaskState) {
        self.lock().states.insert(task_state_key(uuid, name), state);
    }

    /// Make every send fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Every message sent so far, oldest first.
    pub fn sent(&self) -> Vec<Vec<Signature>> {
        self.lock().sent.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, signatures: Vec<Signature>) -> Result<()> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(QueueError::Unavailable("broker is down".to_string()).into());
        }
        state.sent.push(signatures);
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn send_chain(&self, chain: Chain) -> Result<()> {
        self.push(chain.into_signatures())
    }

    async fn send_task(&self, signature: Signature) -> Result<()> {
        self.push(vec![signature])
    }

    async fn task_state(&self, uuid: &TaskUuid, name: &str) -> Result<TaskState> {
        Ok(self
            .lock()
            .states
            .get(&task_state_key(uuid, name))
            .copied()
            .unwrap_or(TaskState::Pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irgsh_core::queue::{IsoPayload, TaskPayload};

    #[tokio::test]
    async fn test_unreported_signature_is_pending() {
        let queue = MemoryTaskQueue::new();
        let uuid = TaskUuid::random();
        assert_eq!(queue.task_state(&uuid, "build").await.unwrap(), TaskState::Pending);

        queue.set_state(&uuid, "build", TaskState::Success);
        assert_eq!(queue.task_state(&uuid, "build").await.unwrap(), TaskState::Success);
        assert_eq!(queue.task_state(&uuid, "repo").await.unwrap(), TaskState::Pending);
    }

    #[tokio::test]
    async fn test_unavailable_rejects_sends() {
        let queue = MemoryTaskQueue::new();
        queue.set_unavailable(true);

        let signature = Signature::new(TaskUuid::random(), TaskPayload::Iso(IsoPayload::default()));
        assert!(queue.send_task(signature.clone()).await.is_err());
        assert!(queue.sent().is_empty());

        queue.set_unavailable(false);
        queue.send_task(signature).await.unwrap();
        assert_eq!(queue.sent().len(), 1);
    }
}
