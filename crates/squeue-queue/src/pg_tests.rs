//! Queue behavior on PostgreSQL, where claims and recovery take row locks
//! and forced destroy takes a table lock.
//!
//! These tests need a live server: `DATABASE_URL=postgres://... cargo test -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures::future::join_all;
use squeue_core::{
    ColumnDef, ColumnType, Predicate, Priority, Record, RowId, Status, Value, meta,
};

use crate::testing::{backdate, pg_queue, pg_store, queue_on, record, start_next, text_payload};
use crate::{LeaseTimeouts, QueueError};

const HOUR: Duration = Duration::from_secs(60 * 60);

#[tokio::test]
#[ignore]
async fn test_claim_serves_highest_priority_first() {
    let queue = pg_queue("squeue_pg_priority").await;
    for (name, priority) in [("a", 5), ("b", 9), ("c", 1)] {
        queue
            .put(vec![record(name)], Priority::clamped(priority))
            .await
            .unwrap();
    }

    let mut claimed = Vec::new();
    while let Some(id) = queue.claim(None).await.unwrap() {
        claimed.push(id.get());
    }
    assert_eq!(claimed, vec![2, 1, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_concurrent_claims_skip_locked_rows() {
    let queue = Arc::new(pg_queue("squeue_pg_concurrent").await);
    let records = (0..5).map(|i| record(&format!("job{i}"))).collect();
    queue.put(records, Priority::default()).await.unwrap();

    let attempts = (0..12).map(|_| {
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
    let outcomes: Vec<Option<RowId>> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let mut ids: Vec<i64> = outcomes.iter().flatten().map(|id| id.get()).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    assert_eq!(outcomes.iter().filter(|id| id.is_none()).count(), 7);
}

#[tokio::test]
#[ignore]
async fn test_recover_stale_claim() {
    let queue = pg_queue("squeue_pg_recover").await;
    queue
        .put(vec![record("a"), record("b")], Priority::default())
        .await
        .unwrap();
    let stale = queue.claim(None).await.unwrap().unwrap();
    let fresh = queue.claim(None).await.unwrap().unwrap();
    backdate(&queue, stale, meta::SQ_CLAIM_TIME, 2 * HOUR).await;

    let reclaimed = queue.recover_expired(LeaseTimeouts::default()).await.unwrap();

    let ids: Vec<RowId> = reclaimed.iter().map(|row| row.id).collect();
    assert_eq!(ids, vec![stale]);
    assert_eq!(queue.status(stale).await.unwrap(), Some(Status::Destroyed));
    assert_eq!(queue.status(fresh).await.unwrap(), Some(Status::Claimed));
}

#[tokio::test]
#[ignore]
async fn test_reclaim_skips_finished_row() {
    let queue = pg_queue("squeue_pg_reclaim").await;
    queue.put(vec![record("a")], Priority::default()).await.unwrap();
    let id = start_next(&queue).await;
    backdate(&queue, id, meta::SQ_GET_TIME, 9 * HOUR).await;
    queue.finish(id, Status::Completed).await.unwrap();

    assert!(queue.reclaim(id, LeaseTimeouts::default()).await.unwrap().is_none());
    assert_eq!(queue.status(id).await.unwrap(), Some(Status::Completed));
}

#[tokio::test]
#[ignore]
async fn test_force_destroy_leaves_available_rows() {
    let queue = pg_queue("squeue_pg_destroy").await;
    let records = ["a", "b", "c", "d"].iter().map(|n| record(n)).collect();
    queue.put(records, Priority::default()).await.unwrap();
    let claimed = queue.claim(None).await.unwrap().unwrap();
    let running = start_next(&queue).await;
    let done = start_next(&queue).await;
    queue.finish(done, Status::Completed).await.unwrap();

    let destroyed = queue
        .force_destroy(&[Status::Claimed, Status::InProgress])
        .await
        .unwrap();

    assert_eq!(destroyed, vec![claimed, running]);
    assert_eq!(queue.status(done).await.unwrap(), Some(Status::Completed));
    assert_eq!(queue.available_count(None).await.unwrap(), 1);
}

#[tokio::test]
#[ignore]
async fn test_text_filters_match_typed_columns() {
    let queue = pg_queue("squeue_pg_filters").await;
    let mut ticket = text_payload("note", "042");
    ticket.insert("attempt".into(), Value::Int(3));
    queue.put(vec![ticket], Priority::default()).await.unwrap();

    let by_note = Predicate::parse_assignment("note=042").unwrap();
    let by_attempt = Predicate::parse_assignment("attempt=3").unwrap();
    assert_eq!(queue.available_count(Some(&by_attempt)).await.unwrap(), 1);
    assert_eq!(queue.claim(Some(&by_note)).await.unwrap(), Some(RowId::new(1)));
}

#[tokio::test]
#[ignore]
async fn test_put_text_into_timestamp_column() {
    let table = "squeue_pg_timestamps";
    let payload = [ColumnDef::new("due", ColumnType::Timestamp).unwrap()];
    let queue = queue_on(pg_store(table).await, table, &payload).await;

    let mut row = Record::new();
    row.insert("due".into(), Value::from("2024-03-01T12:30:00Z"));
    queue.put(vec![row], Priority::default()).await.unwrap();

    let stored = queue.row(RowId::new(1)).await.unwrap().unwrap();
    assert_eq!(
        stored.payload["due"],
        Value::Timestamp(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
    );
}
