// Transfer Task State Machine
//
// pending -> running -> {completed | failed | cancelled}
// running <-> paused, paused -> pending (resume), failed -> pending (retry)

use crate::config::RetryPolicy;
use crate::error::{Result, TransferError};
use crate::remote::identity::HostId;
use crate::transfer::types::*;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

impl TransferTask {
    pub fn new(
        direction: TransferDirection,
        host: impl Into<HostId>,
        local_path: PathBuf,
        remote_path: impl Into<String>,
        size: Option<u64>,
        max_retries: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            status: TaskStatus::Pending,
            priority: size.map(TaskPriority::from_size).unwrap_or(TaskPriority::Normal),
            host: host.into(),
            local_path,
            remote_path: remote_path.into(),
            size,
            transferred: 0,
            speed: 0,
            progress: 0.0,
            chunks: None,
            created_at: current_timestamp(),
            seq: next_seq(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            error: None,
            resume_offset: 0,
            abort_intent: AbortIntent::None,
            cancel: CancellationToken::new(),
            paused_by_queue: false,
        }
    }

    fn transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (from, to) {
            (Pending, Running) => true,
            (Pending, Cancelled) => true,
            (Running, Paused) => true,
            (Running, Completed) => true,
            (Running, Failed) => true,
            (Running, Cancelled) => true,
            (Paused, Pending) => true,
            (Paused, Running) => true,
            (Paused, Cancelled) => true,
            (Failed, Pending) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }

    fn transition(&mut self, to: TaskStatus) -> Result<()> {
        if !Self::transition_allowed(self.status, to) {
            return Err(TransferError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending -> Running, stamping the start time of the first run
    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        if self.started_at.is_none() {
            self.started_at = Some(current_timestamp());
        }
        self.abort_intent = AbortIntent::None;
        Ok(())
    }

    /// Running -> Completed. Progress is forced to 100.
    pub fn complete(&mut self) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(TransferError::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::Completed.to_string(),
            });
        }
        self.status = TaskStatus::Completed;
        self.progress = 100.0;
        if let Some(size) = self.size {
            self.transferred = size;
        }
        self.completed_at = Some(current_timestamp());
        Ok(())
    }

    /// Mark permanently failed. An already-failed task keeps its first
    /// error message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        if self.status == TaskStatus::Failed {
            return Ok(());
        }
        self.transition(TaskStatus::Failed)?;
        self.error = Some(message.into());
        self.completed_at = Some(current_timestamp());
        Ok(())
    }

    /// Terminal cancel. Refused once the task has already completed or
    /// failed.
    pub fn cancel_task(&mut self) -> Result<()> {
        if matches!(self.status, TaskStatus::Completed | TaskStatus::Failed) {
            return Err(TransferError::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::Cancelled.to_string(),
            });
        }
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(current_timestamp());
        Ok(())
    }

    /// Running -> Paused. Transferred bytes and progress are preserved so
    /// the next run resumes instead of restarting.
    pub fn pause(&mut self) -> Result<()> {
        self.transition(TaskStatus::Paused)
    }

    /// Longest prefix of the file known to be complete at the destination.
    ///
    /// An unchunked run writes sequentially, so everything transferred is
    /// contiguous. A chunked run may have completed chunks beyond a gap;
    /// only the contiguous prefix (plus the partial bytes of the first
    /// unfinished chunk, which are written sequentially from its offset)
    /// can be resumed from.
    fn contiguous_prefix(&self) -> u64 {
        match &self.chunks {
            None => self.transferred,
            Some(chunks) => {
                let mut offset = 0;
                for chunk in chunks {
                    if chunk.status == ChunkStatus::Completed {
                        offset = chunk.end;
                    } else {
                        offset = chunk.offset + chunk.transferred;
                        break;
                    }
                }
                offset
            }
        }
    }

    /// Paused -> Pending. The task re-enters the scheduler with a fresh
    /// cancellation token and resumes from the bytes already at the
    /// destination instead of restarting.
    pub fn requeue_for_resume(&mut self) -> Result<()> {
        if self.status != TaskStatus::Paused {
            return Err(TransferError::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::Pending.to_string(),
            });
        }
        self.status = TaskStatus::Pending;
        self.resume_offset = self.contiguous_prefix();
        self.transferred = self.resume_offset;
        self.chunks = None;
        self.cancel = CancellationToken::new();
        self.abort_intent = AbortIntent::None;
        self.paused_by_queue = false;
        Ok(())
    }

    /// Failed -> Pending for a retry attempt. The partial destination may
    /// be stale, so the next run restarts from offset zero.
    pub fn requeue_for_retry(&mut self) -> Result<()> {
        if self.status != TaskStatus::Failed {
            return Err(TransferError::InvalidTransition {
                from: self.status.to_string(),
                to: TaskStatus::Pending.to_string(),
            });
        }
        self.status = TaskStatus::Pending;
        self.transferred = 0;
        self.progress = 0.0;
        self.speed = 0;
        self.chunks = None;
        self.resume_offset = 0;
        self.completed_at = None;
        self.cancel = CancellationToken::new();
        self.abort_intent = AbortIntent::None;
        Ok(())
    }

    /// Count a retry attempt. Returns `true` while attempts remain;
    /// `retry_count` saturates at `max_retries`.
    pub fn increment_retry(&mut self) -> bool {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            true
        } else {
            false
        }
    }

    /// Backoff before the next retry, based on the current retry count
    pub fn retry_delay(&self, policy: &RetryPolicy) -> Duration {
        policy.delay_for_attempt(self.retry_count)
    }

    /// Record a progress report. Transferred bytes and progress percentage
    /// never move backwards while running; transferred is capped at the
    /// known size.
    pub fn record_progress(&mut self, transferred: u64, speed: u64) {
        let transferred = match self.size {
            Some(size) => transferred.min(size),
            None => transferred,
        };
        if transferred > self.transferred {
            self.transferred = transferred;
        }
        self.speed = speed;
        if let Some(size) = self.size {
            if size > 0 {
                let pct = (self.transferred as f64 / size as f64) * 100.0;
                if pct > self.progress {
                    self.progress = pct.min(100.0);
                }
            }
        }
    }

    /// Record the size once discovered and re-derive priority from it
    pub fn set_size(&mut self, size: u64) {
        self.size = Some(size);
        self.priority = TaskPriority::from_size(size);
    }

    /// Update the last error message without changing state; used between
    /// retry attempts
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Request a cooperative abort, remembering whether it was a pause or
    /// a cancel so the executor can classify the outcome.
    pub(crate) fn request_abort(&mut self, intent: AbortIntent) {
        self.abort_intent = intent;
        self.cancel.cancel();
    }

    pub(crate) fn abort_intent(&self) -> AbortIntent {
        self.abort_intent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TransferTask {
        TransferTask::new(
            TransferDirection::Download,
            "host-1",
            PathBuf::from("/tmp/file.bin"),
            "/srv/file.bin",
            Some(4096),
            3,
        )
    }

    #[test]
    fn test_happy_path() {
        let mut t = task();
        assert_eq!(t.status, TaskStatus::Pending);
        t.start().unwrap();
        assert_eq!(t.status, TaskStatus::Running);
        assert!(t.started_at.is_some());
        t.complete().unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.progress, 100.0);
        assert_eq!(t.transferred, 4096);
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn test_complete_requires_running() {
        let mut t = task();
        assert!(t.complete().is_err());
    }

    #[test]
    fn test_fail_keeps_first_error() {
        let mut t = task();
        t.start().unwrap();
        t.fail("first").unwrap();
        t.fail("second").unwrap();
        assert_eq!(t.error.as_deref(), Some("first"));
    }

    #[test]
    fn test_cancel_refused_after_terminal() {
        let mut t = task();
        t.start().unwrap();
        t.complete().unwrap();
        assert!(t.cancel_task().is_err());

        let mut t = task();
        t.start().unwrap();
        t.fail("boom").unwrap();
        assert!(t.cancel_task().is_err());
    }

    #[test]
    fn test_pause_resume_preserves_bytes() {
        let mut t = task();
        t.start().unwrap();
        t.record_progress(1024, 512);
        t.pause().unwrap();
        assert_eq!(t.transferred, 1024);
        t.requeue_for_resume().unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.resume_offset, 1024);
        assert_eq!(t.transferred, 1024);
    }

    #[test]
    fn test_resume_offset_skips_gapped_chunks() {
        let mut t = TransferTask::new(
            TransferDirection::Download,
            "host-1",
            PathBuf::from("/tmp/big.bin"),
            "/srv/big.bin",
            Some(40),
            3,
        );
        t.start().unwrap();
        let mut chunks = vec![
            ChunkState::new(0, 0, 10),
            ChunkState::new(1, 10, 20),
            ChunkState::new(2, 20, 30),
            ChunkState::new(3, 30, 40),
        ];
        chunks[0].status = ChunkStatus::Completed;
        chunks[0].transferred = 10;
        chunks[1].status = ChunkStatus::Transferring;
        chunks[1].transferred = 4;
        // Completed past the gap; not resumable by byte offset
        chunks[2].status = ChunkStatus::Completed;
        chunks[2].transferred = 10;
        t.chunks = Some(chunks);
        t.transferred = 24;
        t.pause().unwrap();
        t.requeue_for_resume().unwrap();
        assert_eq!(t.resume_offset, 14);
        assert_eq!(t.transferred, 14);
        assert!(t.chunks.is_none());
    }

    #[test]
    fn test_retry_requeue_restarts() {
        let mut t = task();
        t.start().unwrap();
        t.record_progress(2048, 100);
        t.fail("net down").unwrap();
        t.requeue_for_retry().unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.transferred, 0);
        assert_eq!(t.resume_offset, 0);
        // Error message from the failed attempt remains visible
        assert_eq!(t.error.as_deref(), Some("net down"));
    }

    #[test]
    fn test_increment_retry_saturates() {
        let mut t = task();
        assert!(t.increment_retry());
        assert!(t.increment_retry());
        assert!(t.increment_retry());
        assert!(!t.increment_retry());
        assert_eq!(t.retry_count, 3);
    }

    #[test]
    fn test_retry_delay_backoff() {
        let policy = RetryPolicy {
            enabled: true,
            max_retries: 5,
            retry_delay_ms: 2000,
            backoff_multiplier: 2.0,
        };
        let mut t = task();
        t.increment_retry();
        t.increment_retry();
        t.increment_retry();
        assert_eq!(t.retry_delay(&policy), Duration::from_millis(8000));
    }

    #[test]
    fn test_progress_monotone() {
        let mut t = task();
        t.start().unwrap();
        t.record_progress(2048, 100);
        let progress = t.progress;
        t.record_progress(1024, 100);
        assert_eq!(t.transferred, 2048);
        assert_eq!(t.progress, progress);
    }

    #[test]
    fn test_transferred_capped_at_size() {
        let mut t = task();
        t.start().unwrap();
        t.record_progress(9999, 100);
        assert_eq!(t.transferred, 4096);
        assert_eq!(t.progress, 100.0);
    }

    #[test]
    fn test_set_size_rederives_priority() {
        let mut t = TransferTask::new(
            TransferDirection::Upload,
            "host-1",
            PathBuf::from("/tmp/big.iso"),
            "/srv/big.iso",
            None,
            3,
        );
        assert_eq!(t.priority, TaskPriority::Normal);
        t.set_size(150 * 1024 * 1024);
        assert_eq!(t.priority, TaskPriority::Low);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut t = task();
        assert!(t.pause().is_err());
        t.start().unwrap();
        t.pause().unwrap();
        assert!(t.complete().is_err());
    }
}
