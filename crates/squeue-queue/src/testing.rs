//! Shared fixtures for queue tests, backed by private in-memory SQLite unless
//! a test asks for a file database or a PostgreSQL server.

use std::sync::Arc;
use std::time::Duration;

use squeue_core::{ColumnDef, ColumnType, Record, RowId, Statement, Value};
use squeue_db::{PoolSettings, SqliteStore, Store};
use tempfile::TempDir;

use crate::queue::SqlQueue;
use crate::schema::create_table;

pub(crate) const TABLE: &str = "jobs";

pub(crate) async fn memory_store() -> Arc<dyn Store> {
    Arc::new(SqliteStore::in_memory().await.unwrap())
}

/// Payload columns `name TEXT`, `attempt INTEGER` and `note TEXT`.
pub(crate) fn payload_columns() -> Vec<ColumnDef> {
    vec![
        ColumnDef::new("name", ColumnType::Text).unwrap(),
        ColumnDef::new("attempt", ColumnType::Integer).unwrap(),
        ColumnDef::new("note", ColumnType::Text).unwrap(),
    ]
}

/// Create `table` in `store` and open it as host "test-host".
pub(crate) async fn queue_on(
    store: Arc<dyn Store>,
    table: &str,
    payload: &[ColumnDef],
) -> SqlQueue {
    create_table(store.as_ref(), table, payload).await.unwrap();
    SqlQueue::open(store, table)
        .await
        .unwrap()
        .with_hostname("test-host")
}

pub(crate) async fn memory_queue() -> SqlQueue {
    queue_on(memory_store().await, TABLE, &payload_columns()).await
}

/// Queue in a WAL-mode database file under `dir`, served by a pool of
/// `max_connections` connections.
pub(crate) async fn file_queue(dir: &TempDir, max_connections: u32) -> SqlQueue {
    let url = format!("sqlite://{}", dir.path().join("queue.db").display());
    let settings = PoolSettings {
        max_connections,
        ..PoolSettings::default()
    };
    let store = SqliteStore::connect(&url, &settings).await.unwrap();
    queue_on(Arc::new(store), TABLE, &payload_columns()).await
}

/// Store for the server named by `DATABASE_URL`, with `table` dropped.
pub(crate) async fn pg_store(table: &str) -> Arc<dyn Store> {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = squeue_db::connect(&url, &PoolSettings::default())
        .await
        .unwrap();
    store
        .execute(&Statement::raw(format!("DROP TABLE IF EXISTS {table}")))
        .await
        .unwrap();
    store
}

/// Fresh `table` on the server named by `DATABASE_URL`.
pub(crate) async fn pg_queue(table: &str) -> SqlQueue {
    queue_on(pg_store(table).await, table, &payload_columns()).await
}

pub(crate) fn record(name: &str) -> Record {
    text_payload("name", name)
}

pub(crate) fn text_payload(column: &str, value: &str) -> Record {
    let mut record = Record::new();
    record.insert(column.to_string(), Value::from(value));
    record
}

/// Push a lease timestamp `age` into the past, measured on the store clock.
pub(crate) async fn backdate(queue: &SqlQueue, id: RowId, column: &str, age: Duration) {
    let mut qb = queue.builder();
    qb.push(format_args!("UPDATE {} SET {column} = ", queue.name()))
        .push_cutoff(age)
        .push(" WHERE sq_id = ")
        .push_bind(id.get());
    queue.store().execute(&qb.build()).await.unwrap();
}

/// Claim and fetch the next row.
pub(crate) async fn start_next(queue: &SqlQueue) -> RowId {
    let id = queue.claim(None).await.unwrap().unwrap();
    queue.fetch(id).await.unwrap();
    id
}
