// Transfer History Hand-off
//
// Terminal tasks are handed to an external collaborator for durable
// recording; the engine keeps only live tasks in memory.

use crate::transfer::types::{
    current_timestamp, TaskId, TaskStatus, TransferDirection, TransferTask,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Snapshot of a finished task, pushed to the history sink exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub task_id: TaskId,
    pub direction: TransferDirection,
    pub host: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub bytes_transferred: u64,
    pub duration_secs: u64,
    /// Bytes per second over the whole run, zero when unknown
    pub average_speed: u64,
    pub success: bool,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn from_task(task: &TransferTask) -> Self {
        let finished_ts = task.completed_at.unwrap_or_else(current_timestamp);
        let duration_secs = task
            .started_at
            .map(|started| finished_ts.saturating_sub(started))
            .unwrap_or(0);
        let finished_at = Utc
            .timestamp_opt(finished_ts as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let average_speed = if duration_secs > 0 {
            task.transferred / duration_secs
        } else {
            0
        };
        Self {
            task_id: task.id,
            direction: task.direction,
            host: task.host.clone(),
            local_path: task.local_path.clone(),
            remote_path: task.remote_path.clone(),
            bytes_transferred: task.transferred,
            duration_secs,
            average_speed,
            success: task.status == TaskStatus::Completed,
            error: task.error.clone(),
            finished_at,
        }
    }
}

/// Durable recording collaborator. Called once per terminal task.
pub trait HistorySink: Send + Sync {
    fn record(&self, record: TransferRecord);
}

impl<F> HistorySink for F
where
    F: Fn(TransferRecord) + Send + Sync,
{
    fn record(&self, record: TransferRecord) {
        self(record)
    }
}
