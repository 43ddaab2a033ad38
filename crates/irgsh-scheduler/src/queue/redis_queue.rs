//! Redis list broker.

use std::time::Duration;

use async_trait::async_trait;
use irgsh_core::pipeline::TaskState;
use irgsh_core::queue::{Chain, Signature, TaskQueue};
use irgsh_core::{Result, TaskUuid};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::task_state_key;
use crate::error::{QueueError, QueueResult};

/// Message pushed onto the broker list.
///
/// The head signature runs first; `on_success` holds the rest of the
/// chain, handed on by the worker once the head succeeds.
#[derive(Serialize)]
struct QueueMessage<'a> {
    #[serde(flatten)]
    signature: &'a Signature,
    on_success: &'a [Signature],
    result_ttl: u64,
}

/// Per-signature state as written by workers.
#[derive(Deserialize)]
struct TaskStateRecord {
    state: TaskState,
}

/// Encode a chain (or a single signature) as one broker message.
fn encode_message(signatures: &[Signature], result_ttl: Duration) -> QueueResult<Option<String>> {
    let Some((head, rest)) = signatures.split_first() else {
        return Ok(None);
    };
    let message = QueueMessage {
        signature: head,
        on_success: rest,
        result_ttl: result_ttl.as_secs(),
    };
    Ok(Some(serde_json::to_string(&message)?))
}

fn decode_state(key: &str, raw: Option<String>) -> QueueResult<TaskState> {
    let Some(raw) = raw else {
        return Ok(TaskState::Pending);
    };
    let record: TaskStateRecord = serde_json::from_str(&raw).map_err(|e| QueueError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    Ok(record.state)
}

/// Task queue on a Redis list, shared with the workers.
#[derive(Clone)]
pub struct RedisTaskQueue {
    conn: ConnectionManager,
    queue_name: String,
    result_ttl: Duration,
}

impl RedisTaskQueue {
    pub fn new(conn: ConnectionManager, queue_name: impl Into<String>, result_ttl: Duration) -> Self {
        Self {
            conn,
            queue_name: queue_name.into(),
            result_ttl,
        }
    }

    pub async fn connect(
        url: &str,
        queue_name: impl Into<String>,
        result_ttl: Duration,
    ) -> QueueResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, queue_name, result_ttl))
    }

    async fn push(&self, signatures: &[Signature]) -> QueueResult<()> {
        let Some(message) = encode_message(signatures, self.result_ttl)? else {
            return Ok(());
        };

        let mut conn = self.conn.clone();
        let _: () = redis::cmd("LPUSH")
            .arg(&self.queue_name)
            .arg(message)
            .query_async(&mut conn)
            .await?;
        debug!(queue = %self.queue_name, signatures = signatures.len(), "Message pushed");
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn send_chain(&self, chain: Chain) -> Result<()> {
        Ok(self.push(chain.signatures()).await?)
    }

    async fn send_task(&self, signature: Signature) -> Result<()> {
        Ok(self.push(std::slice::from_ref(&signature)).await?)
    }

    async fn task_state(&self, uuid: &TaskUuid, name: &str) -> Result<TaskState> {
        let key = task_state_key(uuid, name);
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(QueueError::from)?;
        Ok(decode_state(&key, raw)?)
    }
}
