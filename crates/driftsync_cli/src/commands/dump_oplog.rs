//! Dump oplog command implementation.

use super::{format_timestamp, open_store};
use driftsync_core::{
    ApplicationStatus, OpSource, OperationLogEntry, OperationLogStore, SystemTimeSource,
};
use driftsync_protocol::{OpType, Timestamp, VectorClock};
use driftsync_storage::KvStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Operation-log entry representation for output.
#[derive(Debug, Serialize)]
pub struct OplogRecord {
    /// Sequence number.
    pub seq: u64,
    /// Operation id.
    pub id: String,
    /// Action type.
    pub action_type: String,
    /// Kind of change.
    pub op_type: OpType,
    /// Entity type.
    pub entity_type: String,
    /// Affected entity ids.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entity_ids: Vec<String>,
    /// Originating client.
    pub client_id: String,
    /// Causal clock of the operation.
    pub vector_clock: VectorClock,
    /// Creation time.
    pub timestamp: Timestamp,
    /// Local or remote.
    pub source: OpSource,
    /// Side-effect status of remote entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ApplicationStatus>,
    /// Acknowledged by the server.
    pub synced: bool,
    /// Given up on.
    pub rejected: bool,
    /// Failed application attempts.
    pub retry_count: u32,
}

impl From<OperationLogEntry> for OplogRecord {
    fn from(entry: OperationLogEntry) -> Self {
        let op = entry.op;
        let mut entity_ids: Vec<String> = op.entity_id.into_iter().collect();
        for id in op.entity_ids.unwrap_or_default() {
            if !entity_ids.contains(&id) {
                entity_ids.push(id);
            }
        }
        Self {
            seq: entry.seq,
            id: op.id,
            action_type: op.action_type,
            op_type: op.op_type,
            entity_type: op.entity_type,
            entity_ids,
            client_id: op.client_id,
            vector_clock: op.vector_clock,
            timestamp: op.timestamp,
            source: entry.source,
            status: entry.application_status,
            synced: entry.synced_at.is_some(),
            rejected: entry.rejected_at.is_some(),
            retry_count: entry.retry_count,
        }
    }
}

/// Reads up to `limit` entries with `seq > after`.
pub async fn read_records(
    store: Arc<dyn KvStore>,
    after: u64,
    limit: Option<usize>,
) -> Result<Vec<OplogRecord>, Box<dyn std::error::Error>> {
    let oplog = OperationLogStore::new(store, Arc::new(SystemTimeSource));
    let max_records = limit.unwrap_or(usize::MAX);
    Ok(oplog
        .get_ops_after_seq(after)
        .await?
        .into_iter()
        .take(max_records)
        .map(OplogRecord::from)
        .collect())
}

/// Runs the dump-oplog command.
pub async fn run(
    path: &Path,
    limit: Option<usize>,
    after: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path).await?;
    let records = read_records(store, after, limit).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print_text_output(&records);
        }
    }

    Ok(())
}

fn print_text_output(records: &[OplogRecord]) {
    println!(
        "{:>8}  {:<24}  {:<8}  {:<6}  {:<10}  {:<16}  CLOCK",
        "SEQ", "ACTION", "TYPE", "SOURCE", "STATUS", "CLIENT"
    );
    println!("{}", "-".repeat(96));

    for record in records {
        let source = match record.source {
            OpSource::Local => "local",
            OpSource::Remote => "remote",
        };
        let status = if record.rejected {
            "rejected".to_string()
        } else if let Some(status) = record.status {
            match status {
                ApplicationStatus::Pending => "pending".to_string(),
                ApplicationStatus::Applied => "applied".to_string(),
                ApplicationStatus::Failed => format!("failed({})", record.retry_count),
            }
        } else if record.synced {
            "synced".to_string()
        } else {
            "unsynced".to_string()
        };

        println!(
            "{:>8}  {:<24}  {:<8}  {:<6}  {:<10}  {:<16}  {}",
            record.seq,
            record.action_type,
            format!("{:?}", record.op_type),
            source,
            status,
            record.client_id,
            record.vector_clock
        );
        println!(
            "          {} {} [{}] at {}",
            record.entity_type,
            record.id,
            record.entity_ids.join(", "),
            format_timestamp(record.timestamp)
        );
    }

    println!();
    println!("Total: {} entries", records.len());
}
