//! Backing store dialects and the capabilities the queue relies on.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::schema::ColumnType;
use crate::sql::{QueryBuilder, Statement, TableName};
use crate::value::Value;

/// How a dialect reserves a single row for the duration of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLock {
    /// `SELECT ... FOR UPDATE SKIP LOCKED`: rows locked by a concurrent
    /// transaction are passed over instead of waited on.
    SkipLocked,
    /// No row-level locks. Selection and transition are folded into one
    /// `UPDATE ... RETURNING` statement, which the store executes under its
    /// write lock.
    Statement,
}

/// SQL dialect of a backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::Sqlite => "sqlite",
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
        }
    }

    pub fn row_lock(&self) -> RowLock {
        match self {
            Dialect::Postgres => RowLock::SkipLocked,
            Dialect::Sqlite => RowLock::Statement,
        }
    }

    /// Statement that takes an exclusive table lock until the enclosing
    /// transaction ends, if the dialect has one.
    ///
    /// SQLite has no table locks; its writers already hold the database-wide
    /// write lock for the whole transaction.
    pub fn lock_table_exclusive(&self, table: &TableName) -> Option<String> {
        match self {
            Dialect::Postgres => Some(format!("LOCK TABLE {table} IN ACCESS EXCLUSIVE MODE")),
            Dialect::Sqlite => None,
        }
    }

    /// Query listing `column_name` and `data_type` for each column of `table`.
    pub fn describe_columns(&self, table: &TableName) -> Statement {
        let mut qb = QueryBuilder::new(*self);
        match self {
            Dialect::Postgres => {
                // Unquoted identifiers are folded to lower case by the server.
                qb.push(
                    "SELECT column_name::text AS column_name, data_type::text AS data_type \
                     FROM information_schema.columns WHERE table_name = ",
                )
                .push_bind(table.name().as_str().to_ascii_lowercase())
                .push(" AND table_schema = ");
                match table.schema() {
                    Some(schema) => qb.push_bind(schema.as_str().to_ascii_lowercase()),
                    None => qb.push("current_schema()"),
                };
            }
            Dialect::Sqlite => {
                qb.push("SELECT name AS column_name, type AS data_type FROM pragma_table_info(")
                    .push_bind(table.name().as_str());
                if let Some(schema) = table.schema() {
                    qb.push(", ").push_bind(schema.as_str());
                }
                qb.push(")");
            }
        }
        qb.build()
    }

    /// Expression evaluating to the store's current time.
    pub fn now(&self) -> &'static str {
        match self {
            Dialect::Postgres => "now()",
            Dialect::Sqlite => "strftime('%Y-%m-%d %H:%M:%f', 'now')",
        }
    }

    /// Expression for "store time minus the age bound at `placeholder`".
    pub fn cutoff(&self, placeholder: &str) -> String {
        match self {
            Dialect::Postgres => format!("now() - make_interval(secs => {placeholder})"),
            Dialect::Sqlite => format!("strftime('%Y-%m-%d %H:%M:%f', 'now', {placeholder})"),
        }
    }

    /// Parameter bound into [`Dialect::cutoff`].
    pub fn cutoff_param(&self, age: Duration) -> Value {
        match self {
            Dialect::Postgres => Value::Float(age.as_secs_f64()),
            Dialect::Sqlite => Value::Text(format!("-{:.3} seconds", age.as_secs_f64())),
        }
    }

    pub fn column_type(&self, column_type: ColumnType) -> &'static str {
        match (self, column_type) {
            (Dialect::Postgres, ColumnType::Integer) => "INTEGER",
            (Dialect::Postgres, ColumnType::BigInt) => "BIGINT",
            (Dialect::Postgres, ColumnType::Real) => "DOUBLE PRECISION",
            (Dialect::Postgres, ColumnType::Text) => "TEXT",
            (Dialect::Postgres, ColumnType::Boolean) => "BOOLEAN",
            (Dialect::Postgres, ColumnType::Timestamp) => "TIMESTAMPTZ",
            (Dialect::Sqlite, ColumnType::Integer | ColumnType::BigInt) => "INTEGER",
            (Dialect::Sqlite, ColumnType::Real) => "REAL",
            (Dialect::Sqlite, ColumnType::Text) => "TEXT",
            (Dialect::Sqlite, ColumnType::Boolean) => "BOOLEAN",
            (Dialect::Sqlite, ColumnType::Timestamp) => "DATETIME",
        }
    }

    /// Column definition for the store-assigned, strictly increasing `sq_id`.
    pub fn id_column(&self) -> &'static str {
        match self {
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
            // AUTOINCREMENT keeps ids from being reused after the max row goes away.
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    /// Maximum number of bind parameters in one statement.
    pub fn max_bind_params(&self) -> usize {
        match self {
            Dialect::Postgres => 65_535,
            Dialect::Sqlite => 32_766,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
