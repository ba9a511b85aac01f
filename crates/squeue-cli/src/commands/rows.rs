//! Per-row commands: the producer and worker side of a queue.

use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde_json::json;
use squeue_core::status::DOES_NOT_EXIST;
use squeue_core::{Priority, Record, RowId, Status, Value};

use super::{Target, parse_filters, print_json};

pub async fn put(target: &Target, file: Option<PathBuf>, priority: i64) -> Result<()> {
    let reader: Box<dyn Read> = match &file {
        Some(path) => Box::new(
            std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(std::io::stdin()),
    };
    let records = read_records(BufReader::new(reader))?;

    let (queue, _) = target.open_queue().await?;
    let inserted = queue.put(records, Priority::clamped(priority)).await?;
    print_json(&json!({ "inserted": inserted }))
}

/// One JSON object per non-blank line.
fn read_records(reader: impl BufRead) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&line)
            .with_context(|| format!("line {}: expected a JSON object", index + 1))?;
        records.push(
            object
                .into_iter()
                .map(|(column, value)| (column, Value::from_json(value)))
                .collect(),
        );
    }
    Ok(records)
}

pub async fn claim(target: &Target, filters: &[String]) -> Result<()> {
    let filter = parse_filters(filters)?;
    let (queue, _) = target.open_queue().await?;
    let id = queue.claim(filter.as_ref()).await?;
    print_json(&json!({ "sq_id": id }))
}

pub async fn fetch(target: &Target, id: i64) -> Result<()> {
    let (queue, _) = target.open_queue().await?;
    let row = queue.fetch(RowId::new(id)).await?;
    print_json(&row)
}

pub async fn finish(target: &Target, id: i64, status: &str) -> Result<()> {
    let status: Status = status.parse()?;
    if !status.is_finish_status() {
        bail!("{status} is not a finish status");
    }
    let (queue, _) = target.open_queue().await?;
    queue.finish(RowId::new(id), status.clone()).await?;
    print_json(&json!({ "sq_id": id, "status": status }))
}

pub async fn status(target: &Target, id: i64) -> Result<()> {
    let (queue, _) = target.open_queue().await?;
    let status = queue.status(RowId::new(id)).await?;
    let name = status.as_ref().map_or(DOES_NOT_EXIST, Status::as_str);
    print_json(&json!({ "sq_id": id, "status": name }))
}
