//! Periodic recovery pass.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use squeue_core::QueueRow;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use crate::error::QueueResult;
use crate::queue::SqlQueue;
use crate::recovery::LeaseTimeouts;

/// What to do with rows a sweep reclaims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResubmitPolicy {
    /// Leave them DESTROYED for an operator to inspect.
    #[default]
    Leave,
    /// Enqueue a fresh copy of each.
    Requeue,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub reclaimed: Vec<QueueRow>,
    pub requeued: u64,
}

/// Runs [`SqlQueue::recover_expired`] on a fixed interval.
pub struct Sweeper {
    queue: Arc<SqlQueue>,
    timeouts: LeaseTimeouts,
    period: Duration,
    policy: ResubmitPolicy,
}

impl Sweeper {
    pub fn new(queue: Arc<SqlQueue>, timeouts: LeaseTimeouts) -> Self {
        Self {
            queue,
            timeouts,
            period: Duration::from_secs(60),
            policy: ResubmitPolicy::Leave,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_policy(mut self, policy: ResubmitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn sweep_once(&self) -> QueueResult<SweepReport> {
        let reclaimed = self.queue.recover_expired(self.timeouts).await?;
        let requeued = match self.policy {
            ResubmitPolicy::Requeue if !reclaimed.is_empty() => {
                self.queue.requeue(&reclaimed).await?
            }
            _ => 0,
        };
        if requeued > 0 {
            info!(queue = %self.queue.name(), count = requeued, "Requeued reclaimed rows");
        }
        Ok(SweepReport {
            reclaimed,
            requeued,
        })
    }

    /// Sweep every period until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.queue.name(),
            period_secs = self.period.as_secs_f64(),
            policy = ?self.policy,
            "Starting sweeper"
        );
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(queue = %self.queue.name(), error = %e, "Sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(queue = %self.queue.name(), "Sweeper stopped");
    }
}
