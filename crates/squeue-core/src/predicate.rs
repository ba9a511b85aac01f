//! Typed row filters.
//!
//! Predicates restrict which rows an operation considers, e.g. claiming only
//! rows of one work type. Column names are validated and values bound when a
//! predicate is rendered by [`crate::QueryBuilder::push_predicate`].

use serde::{Deserialize, Serialize};

use crate::schema::ColumnType;
use crate::value::Value;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Eq(String, Value),
    NotEq(String, Value),
    Lt(String, Value),
    Le(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    IsNotNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }

    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::NotEq(column.into(), value.into())
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt(column.into(), value.into())
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt(column.into(), value.into())
    }

    pub fn in_list(column: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::In(column.into(), values)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }

    pub fn and(parts: Vec<Predicate>) -> Self {
        Predicate::And(parts)
    }

    pub fn or(parts: Vec<Predicate>) -> Self {
        Predicate::Or(parts)
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Rewrite every compared value into the type of its column.
    ///
    /// `column_type` resolves a column name; values of unknown columns are
    /// left alone.
    pub fn coerce_values<F>(&self, column_type: &F) -> Result<Predicate>
    where
        F: Fn(&str) -> Option<ColumnType>,
    {
        let coerce = |column: &str, value: &Value| -> Result<Value> {
            let Some(target) = column_type(column) else {
                return Ok(value.clone());
            };
            value
                .clone()
                .coerce_to(target)
                .ok_or_else(|| Error::UnexpectedValue {
                    column: column.to_string(),
                    message: format!("{value:?} is not a valid {target:?} value"),
                })
        };

        let predicate = match self {
            Predicate::Eq(c, v) => Predicate::Eq(c.clone(), coerce(c, v)?),
            Predicate::NotEq(c, v) => Predicate::NotEq(c.clone(), coerce(c, v)?),
            Predicate::Lt(c, v) => Predicate::Lt(c.clone(), coerce(c, v)?),
            Predicate::Le(c, v) => Predicate::Le(c.clone(), coerce(c, v)?),
            Predicate::Gt(c, v) => Predicate::Gt(c.clone(), coerce(c, v)?),
            Predicate::Ge(c, v) => Predicate::Ge(c.clone(), coerce(c, v)?),
            Predicate::In(c, values) => Predicate::In(
                c.clone(),
                values
                    .iter()
                    .map(|v| coerce(c, v))
                    .collect::<Result<_>>()?,
            ),
            Predicate::IsNull(_) | Predicate::IsNotNull(_) => self.clone(),
            Predicate::And(parts) => Predicate::And(
                parts
                    .iter()
                    .map(|p| p.coerce_values(column_type))
                    .collect::<Result<_>>()?,
            ),
            Predicate::Or(parts) => Predicate::Or(
                parts
                    .iter()
                    .map(|p| p.coerce_values(column_type))
                    .collect::<Result<_>>()?,
            ),
            Predicate::Not(inner) => Predicate::Not(Box::new(inner.coerce_values(column_type)?)),
        };
        Ok(predicate)
    }

    /// Parse a `column=value` filter as written on a command line.
    ///
    /// The value is kept as text, exactly as written; see
    /// [`Predicate::coerce_values`] for matching it to the column's type.
    pub fn parse_assignment(input: &str) -> Option<Self> {
        let (column, raw) = input.split_once('=')?;
        Some(Predicate::Eq(
            column.trim().to_string(),
            Value::Text(raw.to_string()),
        ))
    }
}
