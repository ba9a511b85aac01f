//! Queue error types.

use squeue_core::{RowId, Status};
use squeue_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("reserved column name: {0}")]
    ReservedColumn(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("row not found: {0}")]
    NotFound(RowId),

    #[error("invalid transition for row {id}: {from} -> {to}")]
    InvalidTransition { id: RowId, from: Status, to: Status },

    /// The claiming transaction was aborted; the row is untouched.
    #[error("claim failed, retry: {0}")]
    ClaimFailed(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Core(#[from] squeue_core::Error),
}

impl QueueError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::ClaimFailed(_) => true,
            QueueError::Db(err) => err.is_aborted(),
            _ => false,
        }
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
