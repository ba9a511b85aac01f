//! Reclamation of expired leases.
//!
//! A worker that dies after claiming or fetching a row leaves it leased
//! forever. Recovery moves such rows to DESTROYED once their lease is older
//! than a configurable timeout, so operators can see and resubmit them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use squeue_core::{QueryBuilder, QueueRow, RowId, RowLock, Status, meta};
use tracing::{info, warn};

use crate::error::{QueueError, QueueResult};
use crate::queue::{SqlQueue, row_id};

/// How long a lease may be held before recovery reclaims it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseTimeouts {
    /// Measured from `sq_claim_time` for CLAIMED rows.
    pub claimed: Duration,
    /// Measured from `sq_get_time` for IN_PROGRESS rows.
    pub in_progress: Duration,
}

impl Default for LeaseTimeouts {
    fn default() -> Self {
        Self {
            claimed: Duration::from_secs(60 * 60),
            in_progress: Duration::from_secs(8 * 60 * 60),
        }
    }
}

impl SqlQueue {
    /// Move every row whose lease has expired to DESTROYED.
    ///
    /// Each row is reclaimed in its own transaction and re-checked under lock,
    /// so a worker that finishes concurrently is never overwritten. Returns
    /// the reclaimed rows as they were stored after the transition.
    pub async fn recover_expired(&self, timeouts: LeaseTimeouts) -> QueueResult<Vec<QueueRow>> {
        let mut qb = self.builder();
        qb.push(format_args!("SELECT {} FROM {} WHERE ", meta::SQ_ID, self.name()));
        push_expired(&mut qb, timeouts);
        qb.push(format_args!(" ORDER BY {}", meta::SQ_ID));

        let candidates: Vec<RowId> = self
            .store()
            .query(&qb.build())
            .await?
            .iter()
            .filter_map(row_id)
            .collect();

        let mut reclaimed = Vec::new();
        for id in candidates {
            match self.reclaim(id, timeouts).await {
                Ok(Some(row)) => {
                    warn!(
                        queue = %self.name(),
                        sq_id = %id,
                        claim_hostname = row.claim_hostname.as_deref().unwrap_or(""),
                        get_hostname = row.get_hostname.as_deref().unwrap_or(""),
                        "Reclaimed expired lease"
                    );
                    reclaimed.push(row);
                }
                Ok(None) => {}
                Err(QueueError::Db(err)) if err.is_aborted() => {
                    warn!(queue = %self.name(), sq_id = %id, error = %err, "Skipping row, reclaim aborted");
                }
                Err(e) => return Err(e),
            }
        }

        if !reclaimed.is_empty() {
            info!(queue = %self.name(), count = reclaimed.len(), "Recovery pass reclaimed rows");
        }
        Ok(reclaimed)
    }

    /// Reclaim `id` if its lease is still expired, re-checked under lock.
    pub(crate) async fn reclaim(
        &self,
        id: RowId,
        timeouts: LeaseTimeouts,
    ) -> QueueResult<Option<QueueRow>> {
        let mut tx = self.store().transaction().await?;

        if self.store().dialect().row_lock() == RowLock::SkipLocked {
            let mut qb = self.builder();
            qb.push(format_args!(
                "SELECT {} FROM {} WHERE {} = ",
                meta::SQ_ID,
                self.name(),
                meta::SQ_ID
            ))
            .push_bind(id.get())
            .push(" AND (");
            push_expired(&mut qb, timeouts);
            qb.push(")").push_row_lock();

            // Locked by a worker mid-transition, or no longer expired.
            if tx.query(&qb.build()).await?.is_empty() {
                tx.rollback().await?;
                return Ok(None);
            }
        }

        let mut qb = self.builder();
        qb.push(format_args!("UPDATE {} SET {} = ", self.name(), meta::SQ_STATUS))
            .push_bind(Status::Destroyed.as_str())
            .push(format_args!(" WHERE {} = ", meta::SQ_ID))
            .push_bind(id.get())
            .push(" AND (");
        push_expired(&mut qb, timeouts);
        qb.push(")");

        if tx.execute(&qb.build()).await? == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = self.row_in(tx.as_mut(), id).await?;
        tx.commit().await?;
        Ok(row)
    }
}

fn push_expired(qb: &mut QueryBuilder, timeouts: LeaseTimeouts) {
    qb.push(format_args!("({} = ", meta::SQ_STATUS))
        .push_bind(Status::Claimed.as_str())
        .push(format_args!(" AND {} < ", meta::SQ_CLAIM_TIME))
        .push_cutoff(timeouts.claimed)
        .push(format_args!(") OR ({} = ", meta::SQ_STATUS))
        .push_bind(Status::InProgress.as_str())
        .push(format_args!(" AND {} < ", meta::SQ_GET_TIME))
        .push_cutoff(timeouts.in_progress)
        .push(")");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{backdate, memory_queue, record, start_next};
    use squeue_core::Priority;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    #[test]
    fn test_default_timeouts() {
        let timeouts = LeaseTimeouts::default();
        assert_eq!(timeouts.claimed, HOUR);
        assert_eq!(timeouts.in_progress, 8 * HOUR);
    }

    #[tokio::test]
    async fn test_recover_stale_claim() {
        let queue = memory_queue().await;
        queue
            .put(vec![record("a"), record("b")], Priority::default())
            .await
            .unwrap();
        let stale = queue.claim(None).await.unwrap().unwrap();
        let fresh = queue.claim(None).await.unwrap().unwrap();
        backdate(&queue, stale, meta::SQ_CLAIM_TIME, 2 * HOUR).await;

        let reclaimed = queue.recover_expired(LeaseTimeouts::default()).await.unwrap();

        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, stale);
        assert_eq!(reclaimed[0].status, Status::Destroyed);
        assert_eq!(reclaimed[0].claim_hostname.as_deref(), Some("test-host"));
        assert_eq!(queue.status(stale).await.unwrap(), Some(Status::Destroyed));
        assert_eq!(queue.status(fresh).await.unwrap(), Some(Status::Claimed));
    }

    #[tokio::test]
    async fn test_recover_stale_fetch() {
        let queue = memory_queue().await;
        queue
            .put(vec![record("a"), record("b")], Priority::default())
            .await
            .unwrap();
        let stale = start_next(&queue).await;
        let fresh = start_next(&queue).await;
        backdate(&queue, stale, meta::SQ_GET_TIME, 9 * HOUR).await;
        backdate(&queue, fresh, meta::SQ_GET_TIME, 7 * HOUR).await;

        let reclaimed = queue.recover_expired(LeaseTimeouts::default()).await.unwrap();

        let ids: Vec<RowId> = reclaimed.iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![stale]);
        assert_eq!(queue.status(fresh).await.unwrap(), Some(Status::InProgress));
    }

    #[tokio::test]
    async fn test_recover_uses_timeout_per_status() {
        let queue = memory_queue().await;
        queue.put(vec![record("a")], Priority::default()).await.unwrap();
        let id = start_next(&queue).await;
        // An old claim time does not matter once the row is in progress.
        backdate(&queue, id, meta::SQ_CLAIM_TIME, 3 * HOUR).await;

        let reclaimed = queue.recover_expired(LeaseTimeouts::default()).await.unwrap();
        assert!(reclaimed.is_empty());
        assert_eq!(queue.status(id).await.unwrap(), Some(Status::InProgress));
    }

    #[tokio::test]
    async fn test_recover_ignores_finished_rows() {
        let queue = memory_queue().await;
        queue.put(vec![record("a")], Priority::default()).await.unwrap();
        let id = start_next(&queue).await;
        queue.finish(id, Status::Completed).await.unwrap();
        backdate(&queue, id, meta::SQ_GET_TIME, 24 * HOUR).await;

        let reclaimed = queue.recover_expired(LeaseTimeouts::default()).await.unwrap();
        assert!(reclaimed.is_empty());
        assert_eq!(queue.status(id).await.unwrap(), Some(Status::Completed));
    }

    #[tokio::test]
    async fn test_reclaim_skips_row_finished_after_selection() {
        let queue = memory_queue().await;
        queue
            .put(vec![record("a"), record("b")], Priority::default())
            .await
            .unwrap();
        let finished = start_next(&queue).await;
        let abandoned = start_next(&queue).await;
        backdate(&queue, finished, meta::SQ_GET_TIME, 9 * HOUR).await;
        backdate(&queue, abandoned, meta::SQ_GET_TIME, 9 * HOUR).await;

        // The worker finishes between the candidate scan and the reclaim.
        queue.finish(finished, Status::Completed).await.unwrap();

        let timeouts = LeaseTimeouts::default();
        assert!(queue.reclaim(finished, timeouts).await.unwrap().is_none());
        assert_eq!(queue.status(finished).await.unwrap(), Some(Status::Completed));

        let row = queue.reclaim(abandoned, timeouts).await.unwrap().unwrap();
        assert_eq!(row.status, Status::Destroyed);
        assert!(queue.reclaim(abandoned, timeouts).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recover_custom_timeouts() {
        let queue = memory_queue().await;
        queue.put(vec![record("a")], Priority::default()).await.unwrap();
        let id = queue.claim(None).await.unwrap().unwrap();
        backdate(&queue, id, meta::SQ_CLAIM_TIME, Duration::from_secs(120)).await;

        let timeouts = LeaseTimeouts {
            claimed: Duration::from_secs(60),
            in_progress: HOUR,
        };
        let reclaimed = queue.recover_expired(timeouts).await.unwrap();
        assert_eq!(reclaimed.len(), 1);

        // A destroyed row cannot be fetched any more.
        let err = queue.fetch(id).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::InvalidTransition {
                from: Status::Destroyed,
                ..
            }
        ));
    }
}
