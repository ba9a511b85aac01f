//! Operator-initiated bulk destruction.

use squeue_core::{RowId, Statement, Status, meta};
use tracing::info;

use crate::error::QueueResult;
use crate::queue::{SqlQueue, row_id};

impl SqlQueue {
    /// Move every row in one of `statuses` to DESTROYED, whatever its lease
    /// age, and return the affected ids in ascending order.
    ///
    /// The table is locked exclusively for the duration, so no row can change
    /// status between selection and update. Producers and workers block until
    /// it completes.
    pub async fn force_destroy(&self, statuses: &[Status]) -> QueueResult<Vec<RowId>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.store().transaction().await?;
        if let Some(lock) = self.store().dialect().lock_table_exclusive(self.name()) {
            tx.execute(&Statement::raw(lock)).await?;
        }

        let mut qb = self.builder();
        qb.push(format_args!("UPDATE {} SET {} = ", self.name(), meta::SQ_STATUS))
            .push_bind(Status::Destroyed.as_str())
            .push(format_args!(" WHERE {} IN ", meta::SQ_STATUS))
            .push_bind_list(statuses.iter().map(|status| status.as_str()))
            .push(format_args!(" RETURNING {}", meta::SQ_ID));

        let rows = tx.query(&qb.build()).await?;
        tx.commit().await?;

        let mut ids: Vec<RowId> = rows.iter().filter_map(row_id).collect();
        ids.sort();

        let statuses: Vec<&str> = statuses.iter().map(Status::as_str).collect();
        info!(queue = %self.name(), ?statuses, count = ids.len(), "Force-destroyed rows");
        Ok(ids)
    }
}
