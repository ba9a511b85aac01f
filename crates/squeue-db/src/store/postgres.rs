//! PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, Transaction, TypeInfo, ValueRef};
use squeue_core::{Dialect, Record, Statement, Value};

use super::{Store, StoreTransaction};
use crate::{DbError, DbResult, PoolSettings};

/// Store backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, settings: &PoolSettings) -> DbResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
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
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
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

fn bind(statement: &Statement) -> Query<'_, Postgres, PgArguments> {
    let mut query = sqlx::query(&statement.sql);
    for value in &statement.params {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Timestamp(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> DbResult<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let idx = column.ordinal();
        if row.try_get_raw(idx)?.is_null() {
            record.insert(column.name().to_string(), Value::Null);
            continue;
        }
        let value = match column.type_info().name() {
            "BOOL" => Value::Bool(row.try_get(idx)?),
            "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(idx)?)),
            "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(idx)?)),
            "INT8" => Value::Int(row.try_get(idx)?),
            "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(idx)?)),
            "FLOAT8" => Value::Float(row.try_get(idx)?),
            "TIMESTAMPTZ" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(idx)?),
            "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(idx)?.and_utc()),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::Text(row.try_get(idx)?),
            other => {
                return Err(DbError::InvalidData(format!(
                    "column {} has unsupported type {}",
                    column.name(),
                    other
                )));
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}
