//! Correlation of queue rows with the worker hosts they spawned.
//!
//! Some deployments provision one worker host per row, naming the host
//! after the row's id (e.g. `vm-worker-17` for row 17). Each such host then
//! fetches further rows itself. [`HostCorrelation`] answers "what is the
//! most recent thing each of these hosts did" from the table alone.

use std::collections::BTreeMap;

use squeue_core::{RowId, Status, Value, meta};

use crate::error::QueueResult;
use crate::queue::SqlQueue;

/// Maps row ids to worker host names by a fixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCorrelation {
    prefix: String,
}

impl HostCorrelation {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name of the host spawned for `id`.
    pub fn hostname_for(&self, id: RowId) -> String {
        format!("{}{}", self.prefix, id)
    }

    /// Row that spawned `hostname`, if it follows the naming scheme.
    pub fn row_id_for(&self, hostname: &str) -> Option<RowId> {
        hostname.strip_prefix(&self.prefix)?.parse().ok()
    }

    /// Latest status per spawning row.
    ///
    /// For each id in `ids`, reports the status of the newest row fetched by
    /// its host. Ids whose own row was destroyed are reported as DESTROYED
    /// unless their host has since fetched work. Ids with neither are absent
    /// from the result.
    pub async fn latest_status(
        &self,
        queue: &SqlQueue,
        ids: &[RowId],
    ) -> QueueResult<BTreeMap<RowId, Status>> {
        let mut latest = BTreeMap::new();
        if ids.is_empty() {
            return Ok(latest);
        }

        let mut qb = queue.builder();
        qb.push(format_args!(
            "SELECT {}, {} FROM {} WHERE {} = ",
            meta::SQ_ID,
            meta::SQ_STATUS,
            queue.name(),
            meta::SQ_STATUS
        ))
        .push_bind(Status::Destroyed.as_str())
        .push(format_args!(" AND {} IN ", meta::SQ_ID))
        .push_bind_list(ids.iter().map(|id| id.get()));
        for record in queue.store().query(&qb.build()).await? {
            if let Some(id) = record.get(meta::SQ_ID).and_then(Value::as_i64) {
                latest.insert(RowId::new(id), Status::Destroyed);
            }
        }

        let mut qb = queue.builder();
        qb.push(format_args!(
            "SELECT t.{host} AS host, t.{status} AS status FROM {table} t \
             JOIN (SELECT {host}, MAX({id}) AS max_id FROM {table} WHERE {host} IN ",
            host = meta::SQ_GET_HOSTNAME,
            status = meta::SQ_STATUS,
            id = meta::SQ_ID,
            table = queue.name(),
        ))
        .push_bind_list(ids.iter().map(|id| self.hostname_for(*id)))
        .push(format_args!(
            " GROUP BY {host}) m ON t.{id} = m.max_id",
            host = meta::SQ_GET_HOSTNAME,
            id = meta::SQ_ID,
        ));
        for record in queue.store().query(&qb.build()).await? {
            let spawner = record
                .get("host")
                .and_then(Value::as_str)
                .and_then(|host| self.row_id_for(host));
            let status = record.get("status").and_then(Value::as_str);
            if let (Some(spawner), Some(status)) = (spawner, status) {
                latest.insert(spawner, status.parse::<Status>()?);
            }
        }

        Ok(latest)
    }
}
