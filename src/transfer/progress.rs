// Progress Tracking
//
// Speed sampling over a sliding window and best-effort fan-out to
// registered progress sinks.

use crate::transfer::types::{ChunkState, TaskId};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Window over which instantaneous speed is averaged
const SPEED_WINDOW: Duration = Duration::from_secs(5);

/// One progress report pushed to consumers. Delivery is best-effort and
/// may be throttled by the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub task_id: TaskId,
    pub transferred: u64,
    pub total: Option<u64>,
    /// Bytes per second
    pub speed: u64,
    pub chunk_progress: Option<Vec<ChunkState>>,
}

/// Consumer of progress updates, registered on the queue
pub trait ProgressSink: Send + Sync {
    fn update(&self, update: ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn update(&self, update: ProgressUpdate) {
        self(update)
    }
}

/// Event relayed from an in-flight operation to the task executor
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Cumulative bytes for an unchunked run, including any resume base
    Bytes(u64),
    /// Chunked snapshot: total bytes moved plus per-chunk state
    Chunked { total: u64, chunks: Vec<ChunkState> },
}

struct SpeedSample {
    at: Instant,
    transferred: u64,
}

/// Computes instantaneous transfer speed from cumulative byte counts
pub struct SpeedTracker {
    samples: Vec<SpeedSample>,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Record the cumulative byte count and return the current speed in
    /// bytes per second, averaged over the sample window.
    pub fn record(&mut self, transferred: u64) -> u64 {
        let now = Instant::now();
        self.samples.push(SpeedSample {
            at: now,
            transferred,
        });
        self.samples
            .retain(|s| now.duration_since(s.at) <= SPEED_WINDOW);

        let (oldest, newest) = match (self.samples.first(), self.samples.last()) {
            (Some(a), Some(b)) => (a, b),
            _ => return 0,
        };
        let elapsed = newest.at.duration_since(oldest.at).as_secs_f64();
        if elapsed <= f64::EPSILON {
            return 0;
        }
        let moved = newest.transferred.saturating_sub(oldest.transferred);
        (moved as f64 / elapsed) as u64
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}
