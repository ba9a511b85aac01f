//! SQLite store.
//!
//! SQLite has no row locks; the queue folds each reservation into a single
//! `UPDATE ... RETURNING`, which runs under the database write lock.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Column, Row, Sqlite, Transaction, TypeInfo, ValueRef};
use squeue_core::{Dialect, Record, Statement, Value};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::{Store, StoreTransaction};
use crate::{DbError, DbResult, PoolSettings};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Text layout of timestamps, matching the store clock expression.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Store backed by a SQLite database file or an in-memory database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, settings: &PoolSettings) -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        if database_url.contains(":memory:") || database_url.contains("mode=memory") {
            return Self::single_connection(options).await;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await?;
        debug!("SQLite pool established");
        Ok(Self { pool })
    }

    /// Open a private in-memory database (for testing).
    pub async fn in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .busy_timeout(BUSY_TIMEOUT);
        Self::single_connection(options).await
    }

    /// In-memory databases live and die with their connection, so the pool
    /// holds exactly one and never recycles it.
    async fn single_connection(options: SqliteConnectOptions) -> DbResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&self, statement: &Statement) -> DbResult<u64> {
        let result = bind(statement).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn query(&self, statement: &Statement) -> DbResult<Vec<Record>> {
        let rows = bind(statement).fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn transaction(&self) -> DbResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteStoreTransaction { tx }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct SqliteStoreTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StoreTransaction for SqliteStoreTransaction {
    async fn execute(&mut self, statement: &Statement) -> DbResult<u64> {
        let result = bind(statement).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn query(&mut self, statement: &Statement) -> DbResult<Vec<Record>> {
        let rows = bind(statement).fetch_all(&mut *self.tx).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn commit(self: Box<Self>) -> DbResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DbResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn bind(statement: &Statement) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    let mut query = sqlx::query(&statement.sql);
    for value in &statement.params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Timestamp(v) => query.bind(v.format(TIMESTAMP_FORMAT).to_string()),
            Value::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> DbResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let storage = {
            let raw = row.try_get_raw(idx)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_string())
            }
        };
        let Some(storage) = storage else {
            record.insert(column.name().to_string(), Value::Null);
            continue;
        };

        // Declared type decides booleans and timestamps; storage class the rest.
        let value = match (column.type_info().name(), storage.as_str()) {
            ("BOOLEAN", _) => Value::Bool(row.try_get(idx)?),
            ("DATETIME", "TEXT") => {
                Value::Timestamp(row.try_get::<NaiveDateTime, _>(idx)?.and_utc())
            }
            (_, "INTEGER") => Value::Int(row.try_get(idx)?),
            (_, "REAL") => Value::Float(row.try_get(idx)?),
            (_, "TEXT") => Value::Text(row.try_get(idx)?),
            (_, other) => {
                return Err(DbError::InvalidData(format!(
                    "column {} has unsupported storage class {}",
                    column.name(),
                    other
                )));
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}
