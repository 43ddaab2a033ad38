//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for irgsh_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => irgsh_core::Error::NotFound(what),
            other => irgsh_core::Error::Internal(other.to_string()),
        }
    }
}
