//! CLI command implementations.

pub mod admin;
pub mod rows;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use serde_json::json;
use squeue_config::{Config, QueueSettings};
use squeue_core::Predicate;
use squeue_db::{PoolSettings, Store};
use squeue_queue::SqlQueue;

/// Where a command operates, as given on the command line.
pub struct Target {
    pub config: Option<PathBuf>,
    pub database: Option<String>,
    pub url: Option<String>,
    pub queue: Option<String>,
}

impl Target {
    fn load_config(&self) -> Result<Config> {
        let config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::discover()?,
        };
        Ok(config)
    }

    fn queue_name(&self) -> Result<&str> {
        self.queue
            .as_deref()
            .ok_or_else(|| anyhow!("no queue given; pass --queue or set SQUEUE_QUEUE"))
    }

    /// Connect to the database holding the target queue.
    async fn connect(&self) -> Result<(Arc<dyn Store>, QueueSettings)> {
        let config = self.load_config()?;
        let settings = config.queue(self.queue_name()?);

        let url = match &self.url {
            Some(url) => url.clone(),
            None => {
                let nickname = self
                    .database
                    .as_deref()
                    .or(settings.database.as_deref())
                    .ok_or_else(|| {
                        anyhow!("no database given; pass --database or --url, or configure the queue")
                    })?;
                config.database(nickname)?.url()
            }
        };

        let store = squeue_db::connect(&url, &PoolSettings::default()).await?;
        Ok((store, settings))
    }

    async fn open_queue(&self) -> Result<(SqlQueue, QueueSettings)> {
        let (store, settings) = self.connect().await?;
        let queue = SqlQueue::open(store, &settings.name)
            .await
            .with_context(|| format!("opening queue {}", settings.name))?;
        Ok((queue, settings))
    }
}

/// Combine `column=value` arguments into one filter.
fn parse_filters(filters: &[String]) -> Result<Option<Predicate>> {
    let mut parts = Vec::with_capacity(filters.len());
    for filter in filters {
        match Predicate::parse_assignment(filter) {
            Some(predicate) => parts.push(predicate),
            None => bail!("expected column=value, got {filter:?}"),
        }
    }
    Ok(match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(Predicate::and(parts)),
    })
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn databases(target: &Target) -> Result<()> {
    let config = target.load_config()?;
    let nicknames: Vec<&str> = config.nicknames().collect();
    print_json(&nicknames)
}

pub fn queues(target: &Target) -> Result<()> {
    let config = target.load_config()?;
    print_json(&queue_summaries(&config))
}

fn queue_summaries(config: &Config) -> Vec<serde_json::Value> {
    config
        .queues()
        .map(|queue| {
            json!({
                "name": queue.name,
                "database": queue.database,
                "claimed_timeout_secs": queue.claimed_timeout.as_secs(),
                "in_progress_timeout_secs": queue.in_progress_timeout.as_secs(),
            })
        })
        .collect()
}
