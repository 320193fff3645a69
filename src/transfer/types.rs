// Core Transfer Data Structures

use crate::remote::identity::HostId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// Type aliases for clarity
pub type TaskId = Uuid;
pub type Timestamp = u64;

/// Strictly increasing creation sequence; breaks FIFO ties that second
/// resolution timestamps cannot.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_seq() -> u64 {
    NEXT_SEQ.fetch_add(1, Ordering::Relaxed)
}

pub const HIGH_PRIORITY_MAX_BYTES: u64 = 1024 * 1024;
pub const LOW_PRIORITY_MIN_BYTES: u64 = 100 * 1024 * 1024;

/// Current timestamp in seconds since UNIX epoch
pub fn current_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current timestamp in milliseconds since UNIX epoch
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Direction of a transfer relative to the local machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states are out of scheduling; `Failed` may still be
    /// re-queued by the retry path.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Scheduling priority, ordered low to high
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
}

impl TaskPriority {
    /// Derive priority from file size: small files jump the queue, very
    /// large ones yield to everything else.
    pub fn from_size(size: u64) -> Self {
        if size < HIGH_PRIORITY_MAX_BYTES {
            TaskPriority::High
        } else if size > LOW_PRIORITY_MIN_BYTES {
            TaskPriority::Low
        } else {
            TaskPriority::Normal
        }
    }
}

/// Why a run stopped early. Classified by the queue when an aborted
/// operation returns, to tell a pause apart from a cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AbortIntent {
    #[default]
    None,
    Pause,
    Cancel,
}

/// Per-chunk transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    Pending,
    Transferring,
    Completed,
    Failed,
}

/// One byte range of a chunked transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkState {
    pub index: usize,
    /// Inclusive start offset
    pub offset: u64,
    /// Exclusive end offset
    pub end: u64,
    pub size: u64,
    pub transferred: u64,
    pub status: ChunkStatus,
    /// Bytes per second for this chunk
    pub speed: u64,
}

impl ChunkState {
    pub fn new(index: usize, offset: u64, end: u64) -> Self {
        Self {
            index,
            offset,
            end,
            size: end - offset,
            transferred: 0,
            status: ChunkStatus::Pending,
            speed: 0,
        }
    }
}

/// One file transfer tracked by the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferTask {
    pub id: TaskId,
    pub direction: TransferDirection,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Host reference resolved through the host registry
    pub host: HostId,
    pub local_path: PathBuf,
    pub remote_path: String,
    /// Unknown until creation-time stat or first progress report
    pub size: Option<u64>,
    pub transferred: u64,
    /// Bytes per second, instantaneous
    pub speed: u64,
    /// 0-100, monotone non-decreasing while running
    pub progress: f64,
    /// Per-chunk progress when the transfer is chunked
    pub chunks: Option<Vec<ChunkState>>,
    pub created_at: Timestamp,
    /// Creation order within this process, for FIFO tie-breaking
    #[serde(skip, default = "next_seq")]
    pub(crate) seq: u64,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    /// Bytes already at the destination when this run started; a resumed
    /// task continues from here instead of restarting.
    pub resume_offset: u64,
    #[serde(skip)]
    pub(crate) abort_intent: AbortIntent,
    /// Fresh token per run; cancelled to abort the in-flight operation
    #[serde(skip, default)]
    pub cancel: CancellationToken,
    /// Set while the whole queue is paused so a queue resume only picks up
    /// tasks it paused itself
    #[serde(skip)]
    pub(crate) paused_by_queue: bool,
}

/// Aggregate queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
}
