//! Database error types.

use sqlx::error::DatabaseError;
use sqlx::postgres::PgDatabaseError;
use thiserror::Error;

/// SQLSTATEs for transactions the server aborted and a retry may succeed:
/// serialization failure, deadlock, lock not available, statement cancelled.
const PG_ABORT_CODES: [&str; 4] = ["40001", "40P01", "55P03", "57014"];

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("transaction aborted: {0}")]
    Aborted(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),

    #[error(transparent)]
    Sql(#[from] squeue_core::Error),
}

impl DbError {
    /// Whether the failed operation left no trace and may simply be retried.
    pub fn is_aborted(&self) -> bool {
        matches!(self, DbError::Aborted(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let aborted = match &err {
            sqlx::Error::Database(db) => is_transaction_abort(db.as_ref()),
            _ => false,
        };
        let connection = matches!(
            err,
            sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed
        );

        if connection {
            DbError::Connection(err)
        } else if aborted {
            DbError::Aborted(err)
        } else {
            DbError::Database(err)
        }
    }
}

fn is_transaction_abort(db: &(dyn DatabaseError + 'static)) -> bool {
    let Some(code) = db.code() else {
        return false;
    };
    if db.try_downcast_ref::<PgDatabaseError>().is_some() {
        return PG_ABORT_CODES.contains(&code.as_ref());
    }
    // SQLite reports (possibly extended) numeric result codes.
    code.parse::<i32>()
        .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

pub type DbResult<T> = std::result::Result<T, DbError>;
