//! Operator commands: table setup, introspection and lease recovery.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use squeue_config::parse_duration;
use squeue_core::{ColumnDef, RowId, Status};
use squeue_queue::{HostCorrelation, LeaseTimeouts, ResubmitPolicy, Sweeper, create_table};
use tokio::sync::watch;
use tracing::info;

use super::{Target, parse_filters, print_json};

pub async fn create(target: &Target, columns: &[String]) -> Result<()> {
    let payload = columns
        .iter()
        .map(|spec| ColumnDef::parse(spec).with_context(|| format!("column {spec:?}")))
        .collect::<Result<Vec<_>>>()?;

    let (store, settings) = target.connect().await?;
    create_table(store.as_ref(), &settings.name, &payload).await?;
    print_json(&json!({ "created": settings.name, "columns": payload.len() }))
}

pub async fn count(target: &Target, filters: &[String]) -> Result<()> {
    let filter = parse_filters(filters)?;
    let (queue, _) = target.open_queue().await?;
    let available = queue.available_count(filter.as_ref()).await?;
    print_json(&json!({ "available": available }))
}

pub async fn in_progress(target: &Target) -> Result<()> {
    let (queue, _) = target.open_queue().await?;
    print_json(&queue.in_progress().await?)
}

pub async fn recover(
    target: &Target,
    claimed_timeout: Option<&str>,
    in_progress_timeout: Option<&str>,
    requeue: bool,
) -> Result<()> {
    let (queue, settings) = target.open_queue().await?;
    let mut timeouts = LeaseTimeouts {
        claimed: settings.claimed_timeout,
        in_progress: settings.in_progress_timeout,
    };
    if let Some(raw) = claimed_timeout {
        timeouts.claimed = parse_duration(raw)?;
    }
    if let Some(raw) = in_progress_timeout {
        timeouts.in_progress = parse_duration(raw)?;
    }

    let report = Sweeper::new(Arc::new(queue), timeouts)
        .with_policy(policy(requeue))
        .sweep_once()
        .await?;
    print_json(&report)
}

pub async fn destroy(target: &Target, statuses: &[String]) -> Result<()> {
    let statuses = statuses
        .iter()
        .map(|name| name.parse::<Status>())
        .collect::<Result<Vec<_>, _>>()?;
    let (queue, _) = target.open_queue().await?;
    let destroyed = queue.force_destroy(&statuses).await?;
    print_json(&json!({ "destroyed": destroyed }))
}

pub async fn sweep(target: &Target, interval: &str, requeue: bool) -> Result<()> {
    let period = parse_duration(interval)?;
    let (queue, settings) = target.open_queue().await?;
    let timeouts = LeaseTimeouts {
        claimed: settings.claimed_timeout,
        in_progress: settings.in_progress_timeout,
    };
    let sweeper = Sweeper::new(Arc::new(queue), timeouts)
        .with_period(period)
        .with_policy(policy(requeue));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping sweeper");
        }
        let _ = shutdown_tx.send(true);
    });

    sweeper.run(shutdown_rx).await;
    Ok(())
}

pub async fn hosts(target: &Target, prefix: &str, ids: &[i64]) -> Result<()> {
    let ids: Vec<RowId> = ids.iter().copied().map(RowId::new).collect();
    let (queue, _) = target.open_queue().await?;
    let latest = HostCorrelation::new(prefix).latest_status(&queue, &ids).await?;
    print_json(&latest)
}

fn policy(requeue: bool) -> ResubmitPolicy {
    if requeue {
        ResubmitPolicy::Requeue
    } else {
        ResubmitPolicy::Leave
    }
}
