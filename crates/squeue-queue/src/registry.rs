//! Named stores and the queues opened on them.

use std::collections::HashMap;
use std::sync::Arc;

use squeue_db::Store;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{QueueError, QueueResult};
use crate::queue::SqlQueue;

type QueueKey = (String, String);

/// Shares one store per database and one handle per queue within a process.
#[derive(Default)]
pub struct QueueRegistry {
    hostname: Option<String>,
    stores: RwLock<HashMap<String, Arc<dyn Store>>>,
    queues: RwLock<HashMap<QueueKey, Arc<SqlQueue>>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `hostname` into every queue opened through this registry.
    pub fn with_hostname(hostname: impl Into<String>) -> Self {
        Self {
            hostname: Some(hostname.into()),
            ..Self::default()
        }
    }

    /// Register a store under `name`, replacing any previous one.
    pub async fn add_store(&self, name: impl Into<String>, store: Arc<dyn Store>) {
        let name = name.into();
        debug!(store = %name, dialect = %store.dialect(), "Registered store");
        self.stores.write().await.insert(name, store);
    }

    pub async fn store(&self, name: &str) -> Option<Arc<dyn Store>> {
        self.stores.read().await.get(name).cloned()
    }

    /// Handle for queue `queue_name` on store `store_name`, opened on first use.
    pub async fn queue(&self, store_name: &str, queue_name: &str) -> QueueResult<Arc<SqlQueue>> {
        let key = (store_name.to_string(), queue_name.to_string());
        if let Some(queue) = self.queues.read().await.get(&key) {
            return Ok(Arc::clone(queue));
        }

        let store = self
            .store(store_name)
            .await
            .ok_or_else(|| QueueError::Config(format!("unknown store: {store_name}")))?;
        let mut queue = SqlQueue::open(store, queue_name).await?;
        if let Some(hostname) = &self.hostname {
            queue = queue.with_hostname(hostname.clone());
        }

        let mut queues = self.queues.write().await;
        let queue = queues.entry(key).or_insert_with(|| Arc::new(queue));
        Ok(Arc::clone(queue))
    }

    /// Forget a queue handle. Returns whether it was open.
    pub async fn close(&self, store_name: &str, queue_name: &str) -> bool {
        let key = (store_name.to_string(), queue_name.to_string());
        self.queues.write().await.remove(&key).is_some()
    }

    /// Forget a store and every queue opened on it, closing its pool.
    pub async fn close_store(&self, store_name: &str) -> bool {
        self.queues
            .write()
            .await
            .retain(|(store, _), _| store != store_name);
        let Some(store) = self.stores.write().await.remove(store_name) else {
            return false;
        };
        store.close().await;
        info!(store = %store_name, "Closed store");
        true
    }

    /// Number of open queue handles.
    pub async fn open_queues(&self) -> usize {
        self.queues.read().await.len()
    }
}
