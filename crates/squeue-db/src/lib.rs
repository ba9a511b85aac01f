//! Data-access layer for squeue.
//!
//! Provides the store contract the queue is written against and its
//! PostgreSQL and SQLite implementations.

pub mod error;
pub mod store;

pub use error::{DbError, DbResult};
pub use store::*;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Connection pool sizing.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Open a store for `database_url`, choosing the backend from its scheme.
pub async fn connect(database_url: &str, settings: &PoolSettings) -> DbResult<Arc<dyn Store>> {
    info!(url = %redact_url(database_url), "Connecting to database");
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Ok(Arc::new(PgStore::connect(database_url, settings).await?))
    } else if database_url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteStore::connect(database_url, settings).await?))
    } else {
        Err(DbError::UnsupportedUrl(redact_url(database_url)))
    }
}

/// Render a connection URL with its password masked, for logs and errors.
pub fn redact_url(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable url>".to_string(),
    }
}
