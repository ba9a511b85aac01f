//! Dynamically typed column values.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::ColumnType;

/// Column name to value mapping for one table row.
pub type Record = BTreeMap<String, Value>;

/// A single column value as exchanged with the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to the representation a column of `column_type` stores.
    ///
    /// Strict stores reject binds whose type differs from the column, so a
    /// command-line `42` compared against a text column must be sent as text.
    /// Returns `None` when the value has no meaning in that column type.
    pub fn coerce_to(self, column_type: ColumnType) -> Option<Value> {
        match (column_type, self) {
            (_, Value::Null) => Some(Value::Null),
            (ColumnType::Integer | ColumnType::BigInt, value) => match value {
                Value::Int(v) => Some(Value::Int(v)),
                Value::Bool(v) => Some(Value::Int(i64::from(v))),
                Value::Float(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => {
                    Some(Value::Int(v as i64))
                }
                Value::Text(v) => v.trim().parse().ok().map(Value::Int),
                _ => None,
            },
            (ColumnType::Real, value) => match value {
                Value::Float(v) => Some(Value::Float(v)),
                Value::Int(v) => Some(Value::Float(v as f64)),
                Value::Text(v) => v.trim().parse().ok().map(Value::Float),
                _ => None,
            },
            (ColumnType::Text, value) => match value {
                Value::Text(v) => Some(Value::Text(v)),
                Value::Int(v) => Some(Value::Text(v.to_string())),
                Value::Float(v) => Some(Value::Text(v.to_string())),
                Value::Bool(v) => Some(Value::Text(v.to_string())),
                Value::Timestamp(v) => Some(Value::Text(v.to_rfc3339())),
                Value::Null => Some(Value::Null),
            },
            (ColumnType::Boolean, value) => match value {
                Value::Bool(v) => Some(Value::Bool(v)),
                Value::Int(0) => Some(Value::Bool(false)),
                Value::Int(1) => Some(Value::Bool(true)),
                Value::Text(v) => v.trim().to_ascii_lowercase().parse().ok().map(Value::Bool),
                _ => None,
            },
            (ColumnType::Timestamp, value) => match value {
                Value::Timestamp(v) => Some(Value::Timestamp(v)),
                Value::Text(v) => parse_timestamp(&v).map(Value::Timestamp),
                _ => None,
            },
        }
    }

    /// Convert a JSON scalar into a value. Arrays and objects are stored as JSON text.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }
}

/// RFC 3339, or a naive `YYYY-MM-DD[ HH:MM:SS[.fff]]` taken as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|ts| ts.and_utc())
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
