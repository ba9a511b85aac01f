//! The queue handle and its per-row lease operations.

use std::collections::HashMap;
use std::sync::Arc;

use squeue_core::{
    ColumnType, Predicate, Priority, QueryBuilder, QueueRow, Record, RowId, RowLock, Statement,
    Status, TableName, Value, meta,
};
use squeue_db::{Store, StoreTransaction};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::host::local_hostname;

/// A queue backed by one table.
///
/// The handle is cheap to share; all state lives in the table.
pub struct SqlQueue {
    store: Arc<dyn Store>,
    table: TableName,
    hostname: String,
    /// Column types keyed by lower-cased name, read from the catalog on open.
    columns: HashMap<String, ColumnType>,
}

impl SqlQueue {
    /// Open the queue stored in `name` (`table` or `schema.table`).
    ///
    /// Fails with [`QueueError::Config`] if the table is missing or lacks the
    /// meta columns.
    pub async fn open(store: Arc<dyn Store>, name: &str) -> QueueResult<Self> {
        let table = TableName::parse(name)
            .map_err(|e| QueueError::Config(format!("invalid queue name {name:?}: {e}")))?;

        let probe = Statement::raw(format!(
            "SELECT {}, {}, {} FROM {} LIMIT 1",
            meta::SQ_ID,
            meta::SQ_PRIORITY,
            meta::SQ_STATUS,
            table
        ));
        store
            .query(&probe)
            .await
            .map_err(|e| QueueError::Config(format!("{table} is not a queue table: {e}")))?;

        let columns = describe_columns(store.as_ref(), &table).await?;
        debug!(
            queue = %table,
            dialect = %store.dialect(),
            columns = columns.len(),
            "Opened queue"
        );
        Ok(Self {
            store,
            table,
            hostname: local_hostname(),
            columns,
        })
    }

    /// Override the host name stamped into provenance columns.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn name(&self) -> &TableName {
        &self.table
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn builder(&self) -> QueryBuilder {
        QueryBuilder::new(self.store.dialect())
    }

    /// Type of `column`, if the table has it and values can be converted to it.
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns.get(&column.to_ascii_lowercase()).copied()
    }

    /// `filter` with its values converted to the types of their columns.
    fn typed_filter(&self, filter: Option<&Predicate>) -> QueueResult<Option<Predicate>> {
        let column_type = |column: &str| self.column_type(column);
        Ok(filter
            .map(|filter| filter.coerce_values(&column_type))
            .transpose()?)
    }

    fn typed_value(&self, column: &str, value: Value) -> QueueResult<Value> {
        let Some(column_type) = self.column_type(column) else {
            return Ok(value);
        };
        let shown = format!("{value:?}");
        value.coerce_to(column_type).ok_or_else(|| {
            QueueError::InvalidInput(format!(
                "{shown} is not a valid {column_type:?} value for column {column}"
            ))
        })
    }

    /// Enqueue `records` as AVAILABLE rows.
    ///
    /// A record may carry its own `sq_priority`, which wins over `priority`.
    /// Priorities are clamped to the valid range. Any other meta column in a
    /// record is rejected. Payload values are converted to their column's
    /// type. Returns the number of rows inserted.
    pub async fn put(&self, records: Vec<Record>, priority: Priority) -> QueueResult<u64> {
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let mut payload = Record::new();
            let mut own_priority = None;
            for (column, value) in record {
                if column.eq_ignore_ascii_case(meta::SQ_PRIORITY) {
                    if own_priority.replace(value).is_some() {
                        return Err(QueueError::InvalidInput(format!(
                            "{} given more than once",
                            meta::SQ_PRIORITY
                        )));
                    }
                } else if meta::is_reserved(&column) {
                    return Err(QueueError::ReservedColumn(column));
                } else {
                    let value = self.typed_value(&column, value)?;
                    payload.insert(column, value);
                }
            }

            let row_priority = match own_priority {
                None | Some(Value::Null) => priority,
                Some(Value::Int(p)) => Priority::clamped(p),
                Some(other) => {
                    return Err(QueueError::InvalidInput(format!(
                        "{} must be an integer, got {other:?}",
                        meta::SQ_PRIORITY
                    )));
                }
            };

            payload.insert(meta::SQ_PRIORITY.into(), i64::from(row_priority).into());
            payload.insert(meta::SQ_STATUS.into(), Status::Available.as_str().into());
            payload.insert(meta::SQ_PUT_HOSTNAME.into(), self.hostname.clone().into());
            rows.push(payload);
        }

        if rows.is_empty() {
            return Ok(0);
        }

        let inserted = self.store.append_rows(&self.table, &rows).await?;
        info!(queue = %self.table, count = inserted, "Enqueued rows");
        Ok(inserted)
    }

    /// Lease the highest-priority AVAILABLE row matching `filter`.
    ///
    /// Ties are broken by lowest id. Returns `None` when nothing matches, and
    /// [`QueueError::ClaimFailed`] when the store aborted the attempt; the
    /// caller may simply try again.
    pub async fn claim(&self, filter: Option<&Predicate>) -> QueueResult<Option<RowId>> {
        let filter = self.typed_filter(filter)?;
        let result = match self.store.dialect().row_lock() {
            RowLock::SkipLocked => self.claim_locked(filter.as_ref()).await,
            RowLock::Statement => self.claim_statement(filter.as_ref()).await,
        };

        match result {
            Ok(Some(id)) => {
                debug!(queue = %self.table, sq_id = %id, "Claimed row");
                Ok(Some(id))
            }
            Ok(None) => Ok(None),
            Err(QueueError::Db(err)) if err.is_aborted() => {
                warn!(queue = %self.table, error = %err, "Claim aborted");
                Err(QueueError::ClaimFailed(err.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Select-then-update inside one transaction; locked candidates are
    /// skipped rather than waited on.
    async fn claim_locked(&self, filter: Option<&Predicate>) -> QueueResult<Option<RowId>> {
        let mut tx = self.store.transaction().await?;

        let mut qb = self.builder();
        self.push_best_available(&mut qb, filter)?;
        qb.push_row_lock();
        let rows = tx.query(&qb.build()).await?;

        let Some(id) = rows.first().and_then(row_id) else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut qb = self.builder();
        self.push_claim_update(&mut qb);
        qb.push(format_args!(" WHERE {} = ", meta::SQ_ID))
            .push_bind(id.get());
        tx.execute(&qb.build()).await?;
        tx.commit().await?;
        Ok(Some(id))
    }

    /// One `UPDATE .. RETURNING`; the statement holds the write lock for its
    /// whole duration.
    async fn claim_statement(&self, filter: Option<&Predicate>) -> QueueResult<Option<RowId>> {
        let mut qb = self.builder();
        self.push_claim_update(&mut qb);
        qb.push(format_args!(" WHERE {} = (", meta::SQ_ID));
        self.push_best_available(&mut qb, filter)?;
        qb.push(format_args!(") RETURNING {}", meta::SQ_ID));

        let rows = self.store.query(&qb.build()).await?;
        Ok(rows.first().and_then(row_id))
    }

    fn push_best_available(
        &self,
        qb: &mut QueryBuilder,
        filter: Option<&Predicate>,
    ) -> QueueResult<()> {
        qb.push(format_args!(
            "SELECT {} FROM {} WHERE {} = ",
            meta::SQ_ID,
            self.table,
            meta::SQ_STATUS
        ))
        .push_bind(Status::Available.as_str());
        if let Some(filter) = filter {
            qb.push(" AND (");
            qb.push_predicate(filter)?;
            qb.push(")");
        }
        qb.push(format_args!(
            " ORDER BY {} DESC, {} ASC LIMIT 1",
            meta::SQ_PRIORITY,
            meta::SQ_ID
        ));
        Ok(())
    }

    fn push_claim_update(&self, qb: &mut QueryBuilder) {
        qb.push(format_args!("UPDATE {} SET {} = ", self.table, meta::SQ_STATUS))
            .push_bind(Status::Claimed.as_str())
            .push(format_args!(", {} = ", meta::SQ_CLAIM_TIME))
            .push_now()
            .push(format_args!(", {} = ", meta::SQ_CLAIM_HOSTNAME))
            .push_bind(self.hostname.as_str());
    }

    /// Move a CLAIMED row to IN_PROGRESS and return its full contents.
    pub async fn fetch(&self, id: RowId) -> QueueResult<QueueRow> {
        let mut tx = self.store.transaction().await?;

        let mut qb = self.builder();
        qb.push(format_args!("UPDATE {} SET {} = ", self.table, meta::SQ_STATUS))
            .push_bind(Status::InProgress.as_str())
            .push(format_args!(", {} = ", meta::SQ_GET_TIME))
            .push_now()
            .push(format_args!(", {} = ", meta::SQ_GET_HOSTNAME))
            .push_bind(self.hostname.as_str())
            .push(format_args!(" WHERE {} = ", meta::SQ_ID))
            .push_bind(id.get())
            .push(format_args!(" AND {} = ", meta::SQ_STATUS))
            .push_bind(Status::Claimed.as_str());

        if tx.execute(&qb.build()).await? == 0 {
            let current = self.status_in(tx.as_mut(), id).await?;
            tx.rollback().await?;
            return Err(transition_error(id, current, Status::InProgress));
        }

        let row = self
            .row_in(tx.as_mut(), id)
            .await?
            .ok_or(QueueError::NotFound(id))?;
        tx.commit().await?;

        debug!(queue = %self.table, sq_id = %id, "Fetched row");
        Ok(row)
    }

    /// Record the outcome of an IN_PROGRESS row.
    pub async fn finish(&self, id: RowId, status: Status) -> QueueResult<()> {
        let mut tx = self.store.transaction().await?;

        if status.is_finish_status() {
            let mut qb = self.builder();
            qb.push(format_args!("UPDATE {} SET {} = ", self.table, meta::SQ_STATUS))
                .push_bind(status.as_str())
                .push(format_args!(", {} = ", meta::SQ_FINISH_TIME))
                .push_now()
                .push(format_args!(" WHERE {} = ", meta::SQ_ID))
                .push_bind(id.get())
                .push(format_args!(" AND {} = ", meta::SQ_STATUS))
                .push_bind(Status::InProgress.as_str());

            if tx.execute(&qb.build()).await? > 0 {
                tx.commit().await?;
                debug!(queue = %self.table, sq_id = %id, status = %status, "Finished row");
                return Ok(());
            }
        }

        let current = self.status_in(tx.as_mut(), id).await?;
        tx.rollback().await?;
        Err(transition_error(id, current, status))
    }

    /// Current status of `id`, `None` if no such row exists.
    pub async fn status(&self, id: RowId) -> QueueResult<Option<Status>> {
        let statement = self.status_statement(id);
        let rows = self.store.query(&statement).await?;
        parse_status(rows)
    }

    /// Number of AVAILABLE rows matching `filter`.
    pub async fn available_count(&self, filter: Option<&Predicate>) -> QueueResult<u64> {
        let filter = self.typed_filter(filter)?;
        let mut qb = self.builder();
        qb.push(format_args!(
            "SELECT COUNT(*) AS n FROM {} WHERE {} = ",
            self.table,
            meta::SQ_STATUS
        ))
        .push_bind(Status::Available.as_str());
        if let Some(filter) = &filter {
            qb.push(" AND (");
            qb.push_predicate(filter)?;
            qb.push(")");
        }

        let rows = self.store.query(&qb.build()).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// All IN_PROGRESS rows, oldest first.
    pub async fn in_progress(&self) -> QueueResult<Vec<QueueRow>> {
        let mut qb = self.builder();
        qb.push(format_args!(
            "SELECT * FROM {} WHERE {} = ",
            self.table,
            meta::SQ_STATUS
        ))
        .push_bind(Status::InProgress.as_str())
        .push(format_args!(" ORDER BY {}", meta::SQ_ID));

        let rows = self.store.query(&qb.build()).await?;
        rows.into_iter()
            .map(|record| QueueRow::from_record(record).map_err(QueueError::from))
            .collect()
    }

    /// Full contents of `id`, `None` if no such row exists.
    pub async fn row(&self, id: RowId) -> QueueResult<Option<QueueRow>> {
        let rows = self.store.query(&self.row_statement(id)).await?;
        rows.into_iter()
            .next()
            .map(QueueRow::from_record)
            .transpose()
            .map_err(QueueError::from)
    }

    /// Enqueue fresh copies of `rows` at their original priorities.
    ///
    /// The source rows are left untouched; the copies get new ids.
    pub async fn requeue(&self, rows: &[QueueRow]) -> QueueResult<u64> {
        let records = rows
            .iter()
            .map(|row| {
                let mut record = row.payload.clone();
                record.insert(meta::SQ_PRIORITY.into(), i64::from(row.priority).into());
                record
            })
            .collect();
        self.put(records, Priority::default()).await
    }

    pub(crate) async fn status_in(
        &self,
        tx: &mut dyn StoreTransaction,
        id: RowId,
    ) -> QueueResult<Option<Status>> {
        let rows = tx.query(&self.status_statement(id)).await?;
        parse_status(rows)
    }

    pub(crate) async fn row_in(
        &self,
        tx: &mut dyn StoreTransaction,
        id: RowId,
    ) -> QueueResult<Option<QueueRow>> {
        let rows = tx.query(&self.row_statement(id)).await?;
        rows.into_iter()
            .next()
            .map(QueueRow::from_record)
            .transpose()
            .map_err(QueueError::from)
    }

    fn status_statement(&self, id: RowId) -> Statement {
        let mut qb = self.builder();
        qb.push(format_args!(
            "SELECT {} FROM {} WHERE {} = ",
            meta::SQ_STATUS,
            self.table,
            meta::SQ_ID
        ))
        .push_bind(id.get());
        qb.build()
    }

    fn row_statement(&self, id: RowId) -> Statement {
        let mut qb = self.builder();
        qb.push(format_args!("SELECT * FROM {} WHERE {} = ", self.table, meta::SQ_ID))
            .push_bind(id.get());
        qb.build()
    }
}

impl std::fmt::Debug for SqlQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlQueue")
            .field("table", &self.table.to_string())
            .field("dialect", &self.store.dialect())
            .field("hostname", &self.hostname)
            .finish()
    }
}

/// Types of the columns of `table` that values can be converted to.
async fn describe_columns(
    store: &dyn Store,
    table: &TableName,
) -> QueueResult<HashMap<String, ColumnType>> {
    let rows = store
        .query(&store.dialect().describe_columns(table))
        .await?;
    Ok(rows
        .iter()
        .filter_map(|row| {
            let name = row.get("column_name")?.as_str()?;
            let declared = row.get("data_type")?.as_str()?;
            Some((name.to_ascii_lowercase(), ColumnType::from_declared(declared)?))
        })
        .collect())
}

pub(crate) fn row_id(record: &Record) -> Option<RowId> {
    record
        .get(meta::SQ_ID)
        .and_then(Value::as_i64)
        .map(RowId::new)
}

fn parse_status(rows: Vec<Record>) -> QueueResult<Option<Status>> {
    let Some(record) = rows.into_iter().next() else {
        return Ok(None);
    };
    match record.get(meta::SQ_STATUS).and_then(Value::as_str) {
        Some(name) => Ok(Some(name.parse::<Status>()?)),
        None => Err(QueueError::Core(squeue_core::Error::UnexpectedValue {
            column: meta::SQ_STATUS.to_string(),
            message: "missing".to_string(),
        })),
    }
}

fn transition_error(id: RowId, current: Option<Status>, to: Status) -> QueueError {
    match current {
        None => QueueError::NotFound(id),
        Some(from) => QueueError::InvalidTransition { id, from, to },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{file_queue, memory_queue, memory_store, queue_on, record, text_payload};
    use chrono::{TimeZone, Utc};
    use futures::future::join_all;
    use squeue_core::ColumnDef;

    #[tokio::test]
    async fn test_open_missing_table() {
        let store = crate::testing::memory_store().await;
        let err = SqlQueue::open(store, "nope").await.unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[tokio::test]
    async fn test_open_invalid_name() {
        let store = crate::testing::memory_store().await;
        let err = SqlQueue::open(store, "jobs; DROP TABLE x").await.unwrap_err();
        assert!(matches!(err, QueueError::Config(_)));
    }

    #[tokio::test]
    async fn test_claim_empty_queue() {
        let queue = memory_queue().await;
        assert_eq!(queue.claim(None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_claim_serves_highest_priority_first() {
        let queue = memory_queue().await;
        for (name, priority) in [("a", 5), ("b", 9), ("c", 1)] {
            queue
                .put(vec![record(name)], Priority::clamped(priority))
                .await
                .unwrap();
        }

        let first = queue.claim(None).await.unwrap().unwrap();
        let second = queue.claim(None).await.unwrap().unwrap();
        let third = queue.claim(None).await.unwrap().unwrap();
        assert_eq!(queue.claim(None).await.unwrap(), None);

        // Ids follow insertion order: a=1, b=2, c=3.
        assert_eq!(
            vec![first.get(), second.get(), third.get()],
            vec![2, 1, 3]
        );
    }

    #[tokio::test]
    async fn test_claim_order_is_priority_then_id() {
        let queue = memory_queue().await;
        let priorities = [3, 7, 7, 1, 10, 3, 7, 2];
        for p in priorities {
            queue
                .put(vec![record(&format!("p{p}"))], Priority::clamped(p))
                .await
                .unwrap();
        }

        let mut claimed = Vec::new();
        while let Some(id) = queue.claim(None).await.unwrap() {
            let row = queue.row(id).await.unwrap().unwrap();
            claimed.push((row.priority.get(), id.get()));
        }
        assert_eq!(claimed.len(), priorities.len());
        for pair in claimed.windows(2) {
            let (p0, id0) = pair[0];
            let (p1, id1) = pair[1];
            assert!(p0 > p1 || (p0 == p1 && id0 < id1), "{claimed:?}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(file_queue(&dir, 8).await);
        let records = (0..20).map(|i| record(&format!("job{i}"))).collect();
        queue.put(records, Priority::default()).await.unwrap();

        let attempts = (0..60).map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                loop {
                    match queue.claim(None).await {
                        Err(QueueError::ClaimFailed(_)) => continue,
                        other => break other,
                    }
                }
            })
        });
        let results = join_all(attempts).await;

        let outcomes: Vec<Option<RowId>> = results
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();
        let mut ids: Vec<i64> = outcomes.iter().flatten().map(|id| id.get()).collect();
        ids.sort();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
        assert_eq!(outcomes.iter().filter(|id| id.is_none()).count(), 40);
        assert_eq!(queue.available_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_with_filter() {
        let queue = memory_queue().await;
        queue
            .put(vec![record("high")], Priority::MAX)
            .await
            .unwrap();
        queue.put(vec![record("low")], Priority::MIN).await.unwrap();

        let filter = Predicate::eq("name", "low");
        let id = queue.claim(Some(&filter)).await.unwrap().unwrap();
        let row = queue.row(id).await.unwrap().unwrap();
        assert_eq!(row.payload["name"], Value::from("low"));
        assert_eq!(queue.claim(Some(&filter)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_claim_records_lease() {
        let queue = memory_queue().await.with_hostname("worker-7");
        queue.put(vec![record("a")], Priority::default()).await.unwrap();

        let id = queue.claim(None).await.unwrap().unwrap();
        let row = queue.row(id).await.unwrap().unwrap();
        assert_eq!(row.status, Status::Claimed);
        assert_eq!(row.claim_hostname.as_deref(), Some("worker-7"));
        assert!(row.claim_time.is_some());
        assert!(row.get_time.is_none());
    }

    #[tokio::test]
    async fn test_put_fetch_round_trip() {
        let queue = memory_queue().await.with_hostname("host-a");
        let mut payload = record("render");
        payload.insert("attempt".into(), Value::Int(3));
        payload.insert("note".into(), Value::Null);
        queue
            .put(vec![payload.clone()], Priority::clamped(4))
            .await
            .unwrap();

        let id = queue.claim(None).await.unwrap().unwrap();
        let row = queue.fetch(id).await.unwrap();

        assert_eq!(row.id, id);
        assert_eq!(row.status, Status::InProgress);
        assert_eq!(row.priority.get(), 4);
        assert_eq!(row.payload, payload);
        assert_eq!(row.put_hostname.as_deref(), Some("host-a"));
        assert_eq!(row.get_hostname.as_deref(), Some("host-a"));
        let claimed = row.claim_time.unwrap();
        let fetched = row.get_time.unwrap();
        assert!(row.put_time.unwrap() <= claimed);
        assert!(claimed <= fetched);
    }

    #[tokio::test]
    async fn test_finish_sets_status() {
        let queue = memory_queue().await;
        queue.put(vec![record("a")], Priority::default()).await.unwrap();
        let id = queue.claim(None).await.unwrap().unwrap();
        queue.fetch(id).await.unwrap();

        queue.finish(id, Status::Completed).await.unwrap();

        assert_eq!(queue.status(id).await.unwrap(), Some(Status::Completed));
        let row = queue.row(id).await.unwrap().unwrap();
        assert!(row.finish_time.is_some());
    }

    #[tokio::test]
    async fn test_finish_custom_status() {
        let queue = memory_queue().await;
        queue.put(vec![record("a")], Priority::default()).await.unwrap();
        let id = queue.claim(None).await.unwrap().unwrap();
        queue.fetch(id).await.unwrap();

        let partial = Status::custom("PARTIAL").unwrap();
        queue.finish(id, partial.clone()).await.unwrap();
        assert_eq!(queue.status(id).await.unwrap(), Some(partial));
    }

    #[tokio::test]
    async fn test_status_unknown_id() {
        let queue = memory_queue().await;
        assert_eq!(queue.status(RowId::new(999)).await.unwrap(), None);
        assert!(queue.row(RowId::new(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_requires_claim() {
        let queue = memory_queue().await;
        queue.put(vec![record("a")], Priority::default()).await.unwrap();

        let err = queue.fetch(RowId::new(1)).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: Status::Available,
                to: Status::InProgress,
                ..
            }
        ));
        assert_eq!(
            queue.status(RowId::new(1)).await.unwrap(),
            Some(Status::Available)
        );
    }

    #[tokio::test]
    async fn test_fetch_twice_fails() {
        let queue = memory_queue().await;
        queue.put(vec![record("a")], Priority::default()).await.unwrap();
        let id = queue.claim(None).await.unwrap().unwrap();
        queue.fetch(id).await.unwrap();

        let err = queue.fetch(id).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: Status::InProgress,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fetch_unknown_id() {
        let queue = memory_queue().await;
        let err = queue.fetch(RowId::new(42)).await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(id) if id.get() == 42));
    }

    #[tokio::test]
    async fn test_finish_requires_fetch() {
        let queue = memory_queue().await;
        queue.put(vec![record("a")], Priority::default()).await.unwrap();
        let id = queue.claim(None).await.unwrap().unwrap();

        let err = queue.finish(id, Status::Completed).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: Status::Claimed,
                to: Status::Completed,
                ..
            }
        ));
        assert_eq!(queue.status(id).await.unwrap(), Some(Status::Claimed));
    }

    #[tokio::test]
    async fn test_finish_rejects_lease_statuses() {
        let queue = memory_queue().await;
        queue.put(vec![record("a")], Priority::default()).await.unwrap();
        let id = queue.claim(None).await.unwrap().unwrap();
        queue.fetch(id).await.unwrap();

        for status in [Status::Available, Status::Claimed, Status::Destroyed] {
            let err = queue.finish(id, status).await.unwrap_err();
            assert!(matches!(err, QueueError::InvalidTransition { .. }));
        }
        assert_eq!(queue.status(id).await.unwrap(), Some(Status::InProgress));
    }

    #[tokio::test]
    async fn test_finish_twice_fails() {
        let queue = memory_queue().await;
        queue.put(vec![record("a")], Priority::default()).await.unwrap();
        let id = queue.claim(None).await.unwrap().unwrap();
        queue.fetch(id).await.unwrap();
        queue.finish(id, Status::Exception).await.unwrap();

        let err = queue.finish(id, Status::Completed).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: Status::Exception,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_put_rejects_reserved_columns() {
        let queue = memory_queue().await;
        let mut bad = record("a");
        bad.insert(meta::SQ_STATUS.into(), Value::from("COMPLETED"));

        let err = queue.put(vec![bad], Priority::default()).await.unwrap_err();
        assert!(matches!(err, QueueError::ReservedColumn(ref c) if c == meta::SQ_STATUS));
        assert_eq!(queue.available_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_record_priority_wins_and_clamps() {
        let queue = memory_queue().await;
        let mut urgent = record("urgent");
        urgent.insert(meta::SQ_PRIORITY.into(), Value::Int(99));
        let plain = record("plain");

        let inserted = queue
            .put(vec![plain, urgent], Priority::clamped(-4))
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let first = queue.row(RowId::new(1)).await.unwrap().unwrap();
        let second = queue.row(RowId::new(2)).await.unwrap().unwrap();
        assert_eq!(first.priority, Priority::MIN);
        assert_eq!(second.priority, Priority::MAX);
        assert_eq!(first.status, Status::Available);
    }

    #[tokio::test]
    async fn test_put_priority_key_is_case_insensitive() {
        let queue = memory_queue().await;
        let mut shouting = record("loud");
        shouting.insert("SQ_PRIORITY".into(), Value::Int(8));
        queue.put(vec![shouting], Priority::default()).await.unwrap();

        let row = queue.row(RowId::new(1)).await.unwrap().unwrap();
        assert_eq!(row.priority.get(), 8);
        assert!(!row.payload.keys().any(|k| k.eq_ignore_ascii_case("sq_priority")));

        let mut twice = record("twice");
        twice.insert("sq_priority".into(), Value::Int(2));
        twice.insert("Sq_Priority".into(), Value::Int(3));
        let err = queue.put(vec![twice], Priority::default()).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidInput(_)));

        let mut status = record("status");
        status.insert("SQ_STATUS".into(), Value::from("COMPLETED"));
        let err = queue.put(vec![status], Priority::default()).await.unwrap_err();
        assert!(matches!(err, QueueError::ReservedColumn(ref c) if c == "SQ_STATUS"));
    }

    #[tokio::test]
    async fn test_filter_values_follow_column_types() {
        let queue = memory_queue().await;
        let mut ticket = text_payload("note", "042");
        ticket.insert("attempt".into(), Value::Int(3));
        queue
            .put(vec![ticket, text_payload("note", "42")], Priority::default())
            .await
            .unwrap();

        // Written on a command line, both filters arrive as text.
        let by_note = Predicate::parse_assignment("note=042").unwrap();
        let by_attempt = Predicate::parse_assignment("attempt=3").unwrap();
        assert_eq!(queue.available_count(Some(&by_note)).await.unwrap(), 1);
        assert_eq!(queue.available_count(Some(&by_attempt)).await.unwrap(), 1);
        assert_eq!(
            queue.claim(Some(&by_note)).await.unwrap(),
            Some(RowId::new(1))
        );

        // A number compared against a text column is compared as text.
        let numeric = Predicate::eq("note", 42i64);
        assert_eq!(
            queue.claim(Some(&numeric)).await.unwrap(),
            Some(RowId::new(2))
        );

        let nonsense = Predicate::parse_assignment("attempt=many").unwrap();
        let err = queue.available_count(Some(&nonsense)).await.unwrap_err();
        assert!(matches!(err, QueueError::Core(_)));
    }

    #[tokio::test]
    async fn test_put_converts_payload_to_column_types() {
        let payload = [
            ColumnDef::new("due", ColumnType::Timestamp).unwrap(),
            ColumnDef::new("attempt", ColumnType::Integer).unwrap(),
        ];
        let queue = queue_on(memory_store().await, "scheduled", &payload).await;
        assert_eq!(queue.column_type("DUE"), Some(ColumnType::Timestamp));
        assert_eq!(queue.column_type("sq_id"), Some(ColumnType::Integer));
        assert_eq!(queue.column_type("missing"), None);

        let mut row = Record::new();
        row.insert("due".into(), Value::from("2024-03-01T12:30:00Z"));
        row.insert("attempt".into(), Value::from("2"));
        queue.put(vec![row], Priority::default()).await.unwrap();

        let stored = queue.row(RowId::new(1)).await.unwrap().unwrap();
        assert_eq!(
            stored.payload["due"],
            Value::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
        );
        assert_eq!(stored.payload["attempt"], Value::Int(2));

        let mut bad = Record::new();
        bad.insert("due".into(), Value::from("next tuesday"));
        let err = queue.put(vec![bad], Priority::default()).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidInput(_)));
        assert_eq!(queue.available_count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_empty_batch() {
        let queue = memory_queue().await;
        assert_eq!(queue.put(Vec::new(), Priority::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_payloadless_rows() {
        let queue = memory_queue().await;
        let inserted = queue
            .put(vec![Record::new(), Record::new()], Priority::default())
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(queue.available_count(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_available_count_and_in_progress() {
        let queue = memory_queue().await;
        let records = ["a", "b", "c", "a"].iter().map(|n| record(n)).collect();
        queue.put(records, Priority::default()).await.unwrap();

        assert_eq!(queue.available_count(None).await.unwrap(), 4);
        let only_a = Predicate::eq("name", "a");
        assert_eq!(queue.available_count(Some(&only_a)).await.unwrap(), 2);

        let id = queue.claim(None).await.unwrap().unwrap();
        assert!(queue.in_progress().await.unwrap().is_empty());
        queue.fetch(id).await.unwrap();

        let running = queue.in_progress().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, id);
        assert_eq!(queue.available_count(None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_requeue_copies_payload() {
        let queue = memory_queue().await;
        queue
            .put(vec![text_payload("name", "retry-me")], Priority::clamped(6))
            .await
            .unwrap();
        let id = queue.claim(None).await.unwrap().unwrap();
        let row = queue.fetch(id).await.unwrap();

        assert_eq!(queue.requeue(&[row.clone()]).await.unwrap(), 1);

        let copy = queue.row(RowId::new(2)).await.unwrap().unwrap();
        assert_eq!(copy.payload, row.payload);
        assert_eq!(copy.priority.get(), 6);
        assert_eq!(copy.status, Status::Available);
        assert_eq!(queue.status(id).await.unwrap(), Some(Status::InProgress));
    }
}
