//! Database error types.

use runway_core::{BuildId, BuildStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("build {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: BuildId,
        from: BuildStatus,
        to: BuildStatus,
    },

    /// An earlier operation in the same transaction failed.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage error: {0}")]
    Storage(#[from] redb::Error),

    #[error("database task failed: {0}")]
    Task(String),

    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<redb::DatabaseError> for DbError {
    fn from(err: redb::DatabaseError) -> Self {
        DbError::Storage(err.into())
    }
}

impl From<redb::TransactionError> for DbError {
    fn from(err: redb::TransactionError) -> Self {
        DbError::Storage(err.into())
    }
}

impl From<redb::TableError> for DbError {
    fn from(err: redb::TableError) -> Self {
        DbError::Storage(err.into())
    }
}

impl From<redb::StorageError> for DbError {
    fn from(err: redb::StorageError) -> Self {
        DbError::Storage(err.into())
    }
}

impl From<redb::CommitError> for DbError {
    fn from(err: redb::CommitError) -> Self {
        DbError::Storage(err.into())
    }
}

impl From<DbError> for runway_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => runway_core::Error::NotFound(msg),
            DbError::InvalidRange(msg) => runway_core::Error::InvalidInput(msg),
            DbError::InvalidTransition { .. } => runway_core::Error::Conflict(err.to_string()),
            _ => runway_core::Error::Internal(err.to_string()),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
