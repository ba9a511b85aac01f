//! Queue rows: meta columns managed by the queue plus an opaque payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::{Record, Value};
use crate::{Error, Priority, Result, RowId, Status};

/// Names of the columns the queue adds to every table.
pub mod meta {
    pub const SQ_ID: &str = "sq_id";
    pub const SQ_PRIORITY: &str = "sq_priority";
    pub const SQ_STATUS: &str = "sq_status";
    pub const SQ_PUT_TIME: &str = "sq_put_time";
    pub const SQ_PUT_HOSTNAME: &str = "sq_put_hostname";
    pub const SQ_CLAIM_TIME: &str = "sq_claim_time";
    pub const SQ_CLAIM_HOSTNAME: &str = "sq_claim_hostname";
    pub const SQ_GET_TIME: &str = "sq_get_time";
    pub const SQ_GET_HOSTNAME: &str = "sq_get_hostname";
    pub const SQ_FINISH_TIME: &str = "sq_finish_time";

    pub const ALL: [&str; 10] = [
        SQ_ID,
        SQ_PRIORITY,
        SQ_STATUS,
        SQ_PUT_TIME,
        SQ_PUT_HOSTNAME,
        SQ_CLAIM_TIME,
        SQ_CLAIM_HOSTNAME,
        SQ_GET_TIME,
        SQ_GET_HOSTNAME,
        SQ_FINISH_TIME,
    ];

    /// Whether `name` is reserved for queue bookkeeping. Case-insensitive,
    /// since unquoted identifiers fold case in most stores.
    pub fn is_reserved(name: &str) -> bool {
        ALL.iter().any(|reserved| reserved.eq_ignore_ascii_case(name))
    }
}

/// One unit of work as stored in the queue table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRow {
    pub id: RowId,
    pub priority: Priority,
    pub status: Status,
    pub put_time: Option<DateTime<Utc>>,
    pub put_hostname: Option<String>,
    pub claim_time: Option<DateTime<Utc>>,
    pub claim_hostname: Option<String>,
    pub get_time: Option<DateTime<Utc>>,
    pub get_hostname: Option<String>,
    pub finish_time: Option<DateTime<Utc>>,
    /// Caller-defined columns, untouched by the queue.
    pub payload: Record,
}

impl QueueRow {
    /// Split a full table record into meta fields and payload.
    pub fn from_record(mut record: Record) -> Result<Self> {
        let id = take_int(&mut record, meta::SQ_ID)?
            .ok_or_else(|| missing(meta::SQ_ID))?;
        let priority = take_int(&mut record, meta::SQ_PRIORITY)?
            .map(Priority::clamped)
            .unwrap_or_default();
        let status = take_text(&mut record, meta::SQ_STATUS)?
            .ok_or_else(|| missing(meta::SQ_STATUS))?
            .parse::<Status>()?;

        Ok(Self {
            id: RowId::new(id),
            priority,
            status,
            put_time: take_time(&mut record, meta::SQ_PUT_TIME)?,
            put_hostname: take_text(&mut record, meta::SQ_PUT_HOSTNAME)?,
            claim_time: take_time(&mut record, meta::SQ_CLAIM_TIME)?,
            claim_hostname: take_text(&mut record, meta::SQ_CLAIM_HOSTNAME)?,
            get_time: take_time(&mut record, meta::SQ_GET_TIME)?,
            get_hostname: take_text(&mut record, meta::SQ_GET_HOSTNAME)?,
            finish_time: take_time(&mut record, meta::SQ_FINISH_TIME)?,
            payload: record,
        })
    }
}

fn missing(column: &str) -> Error {
    Error::UnexpectedValue {
        column: column.to_string(),
        message: "missing".to_string(),
    }
}

fn unexpected(column: &str, value: &Value, wanted: &str) -> Error {
    Error::UnexpectedValue {
        column: column.to_string(),
        message: format!("expected {wanted}, got {value:?}"),
    }
}

fn take_int(record: &mut Record, column: &str) -> Result<Option<i64>> {
    match record.remove(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int(v)) => Ok(Some(v)),
        Some(other) => Err(unexpected(column, &other, "integer")),
    }
}

fn take_text(record: &mut Record, column: &str) -> Result<Option<String>> {
    match record.remove(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Text(v)) => Ok(Some(v)),
        Some(other) => Err(unexpected(column, &other, "text")),
    }
}

fn take_time(record: &mut Record, column: &str) -> Result<Option<DateTime<Utc>>> {
    match record.remove(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Timestamp(v)) => Ok(Some(v)),
        Some(other) => Err(unexpected(column, &other, "timestamp")),
    }
}
