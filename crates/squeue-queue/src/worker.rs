//! Worker that processes rows from a queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use squeue_core::{Predicate, QueueRow, RowId, Status};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::QueueResult;
use crate::queue::SqlQueue;

/// Processes one fetched row.
///
/// `Ok` records the returned finish status; `Err` records EXCEPTION.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, row: &QueueRow) -> Result<Status, String>;
}

/// Polling cadence of a [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Wait after finding the queue empty.
    pub poll_interval: Duration,
    /// Wait after an error the store reports as retryable.
    pub retry_backoff: Duration,
    /// Wait after any other failure.
    pub error_backoff: Duration,
    /// Restrict which rows this worker claims.
    pub filter: Option<Predicate>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(50),
            error_backoff: Duration::from_secs(5),
            filter: None,
        }
    }
}

/// A worker that claims, fetches, handles and finishes rows.
pub struct Worker {
    queue: Arc<SqlQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(queue: Arc<SqlQueue>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            queue,
            handler,
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Process at most one row. Returns its id, or `None` if none was available.
    pub async fn run_once(&self) -> QueueResult<Option<RowId>> {
        let Some(id) = self.queue.claim(self.config.filter.as_ref()).await? else {
            return Ok(None);
        };
        let row = self.queue.fetch(id).await?;
        debug!(queue = %self.queue.name(), sq_id = %id, "Handling row");

        let status = match self.handler.handle(&row).await {
            Ok(status) => status,
            Err(reason) => {
                warn!(queue = %self.queue.name(), sq_id = %id, error = %reason, "Handler failed");
                Status::Exception
            }
        };
        self.queue.finish(id, status).await?;
        Ok(Some(id))
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue.name(), host = %self.queue.hostname(), "Starting worker");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.config.poll_interval,
                Err(e) if e.is_retryable() => {
                    debug!(error = %e, "Aborted by the store, retrying");
                    self.config.retry_backoff
                }
                Err(e) => {
                    warn!(error = %e, "Worker iteration failed");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(queue = %self.queue.name(), "Worker stopped");
    }
}
