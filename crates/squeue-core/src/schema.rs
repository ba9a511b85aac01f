//! Queue table schema.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::dialect::Dialect;
use crate::row::meta;
use crate::sql::{Ident, Statement, TableName};
use crate::status::Status;
use crate::{Error, Result};

/// Portable type of a caller-defined payload column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    BigInt,
    Real,
    Text,
    Boolean,
    Timestamp,
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "int" | "integer" => Ok(ColumnType::Integer),
            "bigint" => Ok(ColumnType::BigInt),
            "real" | "float" | "double" => Ok(ColumnType::Real),
            "text" | "string" => Ok(ColumnType::Text),
            "bool" | "boolean" => Ok(ColumnType::Boolean),
            "timestamp" | "datetime" => Ok(ColumnType::Timestamp),
            other => Err(Error::InvalidInput(format!("unknown column type: {other}"))),
        }
    }
}

impl ColumnType {
    /// Map a column type as reported by the store's catalog.
    ///
    /// Accepts PostgreSQL `information_schema` names and SQLite declared
    /// types. Returns `None` for types values are never coerced to.
    pub fn from_declared(declared: &str) -> Option<Self> {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.starts_with("BOOL") {
            Some(ColumnType::Boolean)
        } else if upper.starts_with("TIMESTAMP") || upper.starts_with("DATETIME") {
            Some(ColumnType::Timestamp)
        } else if matches!(upper.as_str(), "BIGINT" | "INT8" | "BIGSERIAL") {
            Some(ColumnType::BigInt)
        } else if upper.contains("INT") && !upper.starts_with("INTERVAL") && upper != "POINT" {
            Some(ColumnType::Integer)
        } else if ["CHAR", "CLOB", "TEXT"].iter().any(|t| upper.contains(t)) {
            Some(ColumnType::Text)
        } else if ["REAL", "FLOA", "DOUB"].iter().any(|t| upper.contains(t)) {
            Some(ColumnType::Real)
        } else {
            None
        }
    }
}

/// A caller-defined payload column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: Ident,
    pub column_type: ColumnType,
    pub not_null: bool,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Result<Self> {
        Ok(Self {
            name: Ident::new(name)?,
            column_type,
            not_null: false,
        })
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Parse a `name:type` column spec.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, column_type) = spec
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("expected name:type, got {spec}")))?;
        Self::new(name.trim(), column_type.trim().parse()?)
    }
}

/// DDL creating the queue table and its claim index, both idempotent.
///
/// Payload columns come first, followed by the meta columns. Callers are
/// responsible for rejecting payload names that collide with meta columns.
pub fn create_table_statements(
    dialect: Dialect,
    table: &TableName,
    payload: &[ColumnDef],
) -> Vec<Statement> {
    let timestamp = dialect.column_type(ColumnType::Timestamp);
    let mut columns: Vec<String> = payload
        .iter()
        .map(|column| {
            let mut def = format!("{} {}", column.name, dialect.column_type(column.column_type));
            if column.not_null {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect();

    columns.extend([
        format!("{} {}", meta::SQ_ID, dialect.id_column()),
        format!(
            "{} INTEGER NOT NULL DEFAULT 1 CHECK ({} BETWEEN 1 AND 10)",
            meta::SQ_PRIORITY,
            meta::SQ_PRIORITY
        ),
        format!(
            "{} TEXT NOT NULL DEFAULT '{}'",
            meta::SQ_STATUS,
            Status::Available
        ),
        format!(
            "{} {} DEFAULT ({})",
            meta::SQ_PUT_TIME,
            timestamp,
            dialect.now()
        ),
        format!("{} TEXT", meta::SQ_PUT_HOSTNAME),
        format!("{} {}", meta::SQ_CLAIM_TIME, timestamp),
        format!("{} TEXT", meta::SQ_CLAIM_HOSTNAME),
        format!("{} {}", meta::SQ_GET_TIME, timestamp),
        format!("{} TEXT", meta::SQ_GET_HOSTNAME),
        format!("{} {}", meta::SQ_FINISH_TIME, timestamp),
    ]);

    let create = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table,
        columns.join(", ")
    );

    // Postgres places the index in the table's schema; SQLite wants it qualified.
    let index_name = format!("{}_sq_claim_idx", table.name());
    let index_name = match (dialect, table.schema()) {
        (Dialect::Sqlite, Some(schema)) => format!("{schema}.{index_name}"),
        _ => index_name,
    };
    let index_table = match dialect {
        Dialect::Sqlite => table.name().to_string(),
        Dialect::Postgres => table.to_string(),
    };
    let index = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({}, {} DESC, {})",
        index_name,
        index_table,
        meta::SQ_STATUS,
        meta::SQ_PRIORITY,
        meta::SQ_ID
    );

    vec![Statement::raw(create), Statement::raw(index)]
}
