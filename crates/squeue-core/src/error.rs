//! Error types for squeue core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unexpected value for column {column}: {message}")]
    UnexpectedValue { column: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
