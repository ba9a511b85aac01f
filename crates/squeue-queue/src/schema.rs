//! Queue table creation.

use std::collections::HashSet;

use squeue_core::schema::create_table_statements;
use squeue_core::{ColumnDef, TableName, meta};
use squeue_db::Store;
use tracing::info;

use crate::error::{QueueError, QueueResult};

/// Create the table backing queue `name` with the given payload columns.
///
/// Safe to run against an existing queue table; nothing is altered.
pub async fn create_table(store: &dyn Store, name: &str, payload: &[ColumnDef]) -> QueueResult<()> {
    let table = TableName::parse(name)?;

    let mut seen = HashSet::new();
    for column in payload {
        let column_name = column.name.as_str();
        if meta::is_reserved(column_name) {
            return Err(QueueError::ReservedColumn(column_name.to_string()));
        }
        if !seen.insert(column_name.to_ascii_lowercase()) {
            return Err(QueueError::InvalidInput(format!(
                "duplicate column: {column_name}"
            )));
        }
    }

    for statement in create_table_statements(store.dialect(), &table, payload) {
        store.execute(&statement).await?;
    }

    info!(queue = %table, columns = payload.len(), dialect = %store.dialect(), "Created queue table");
    Ok(())
}
