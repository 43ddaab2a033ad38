//! Fleet registry errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("invalid instance id: {0:?}")]
    InvalidId(String),

    #[error("fleet store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for FleetError {
    fn from(err: redis::RedisError) -> Self {
        FleetError::Store(err.to_string())
    }
}

impl From<FleetError> for irgsh_core::Error {
    fn from(err: FleetError) -> Self {
        match err {
            FleetError::NotFound(what) => irgsh_core::Error::NotFound(what),
            err @ FleetError::InvalidId(_) => irgsh_core::Error::Validation(err.to_string()),
            other => irgsh_core::Error::Internal(other.to_string()),
        }
    }
}

pub type FleetResult<T> = std::result::Result<T, FleetError>;
