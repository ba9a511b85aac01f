//! The data-access contract the queue is written against.

pub mod postgres;
pub mod sqlite;

pub use postgres::PgStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use squeue_core::sql::insert_statements;
use squeue_core::{Dialect, Record, Statement, TableName};

use crate::DbResult;

/// A transactional relational store.
///
/// Every operation fails with a [`crate::DbError`] on transport loss; no
/// operation retries.
#[async_trait]
pub trait Store: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run a statement outside any explicit transaction, returning rows affected.
    async fn execute(&self, statement: &Statement) -> DbResult<u64>;

    /// Run a statement outside any explicit transaction, returning its rows.
    async fn query(&self, statement: &Statement) -> DbResult<Vec<Record>>;

    /// Begin a transaction. Dropping the handle without committing rolls back.
    async fn transaction(&self) -> DbResult<Box<dyn StoreTransaction>>;

    /// Append rows to a table. Batches are not atomic as a whole.
    async fn append_rows(&self, table: &TableName, rows: &[Record]) -> DbResult<u64> {
        let mut inserted = 0;
        for statement in insert_statements(self.dialect(), table, rows)? {
            inserted += self.execute(&statement).await?;
        }
        Ok(inserted)
    }

    /// Check connectivity.
    async fn ping(&self) -> DbResult<()> {
        self.query(&Statement::raw("SELECT 1")).await?;
        Ok(())
    }

    async fn close(&self);
}

/// Statements bound to one open transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn execute(&mut self, statement: &Statement) -> DbResult<u64>;

    async fn query(&mut self, statement: &Statement) -> DbResult<Vec<Record>>;

    async fn commit(self: Box<Self>) -> DbResult<()>;

    async fn rollback(self: Box<Self>) -> DbResult<()>;
}
