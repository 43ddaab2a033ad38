//! Task-queue client errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt task state for {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl From<QueueError> for irgsh_core::Error {
    fn from(err: QueueError) -> Self {
        irgsh_core::Error::Internal(err.to_string())
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
