// Transfer Queue
//
// The orchestrator: accepts tasks, enforces concurrency and priority,
// drives each task through the session pool and chunk manager, and
// implements retry with backoff, pause, resume, and cancel.

use crate::config::{EngineConfig, QueueConfig, RetryPolicy};
use crate::error::{Result, TransferError};
use crate::remote::identity::{AuthMethod, HostIdentity};
use crate::remote::registry::{CredentialStore, HostRegistry};
use crate::remote::{ByteRange, ConnectParams, ProgressFn, SessionLease, SessionPool};
use crate::transfer::chunked::{ChunkedRequest, ChunkedTransferManager};
use crate::transfer::history::{HistorySink, TransferRecord};
use crate::transfer::progress::{ProgressEvent, ProgressSink, ProgressUpdate, SpeedTracker};
use crate::transfer::types::*;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Queue lifecycle notification pushed to registered observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    TaskAdded { task_id: TaskId },
    StatusChanged { task_id: TaskId, status: TaskStatus },
    TaskRemoved { task_id: TaskId },
    QueuePaused,
    QueueResumed,
}

/// Observer of queue lifecycle events, registered explicitly
pub trait QueueObserver: Send + Sync {
    fn on_event(&self, event: QueueEvent);
}

impl<F> QueueObserver for F
where
    F: Fn(QueueEvent) + Send + Sync,
{
    fn on_event(&self, event: QueueEvent) {
        self(event)
    }
}

/// Parameters one run of a task needs, snapshotted under the lock
struct RunSpec {
    id: TaskId,
    direction: TransferDirection,
    host: String,
    local_path: PathBuf,
    remote_path: String,
    size: Option<u64>,
    resume_offset: u64,
    cancel: CancellationToken,
}

struct QueueInner {
    tasks: RwLock<HashMap<TaskId, TransferTask>>,
    pool: Arc<SessionPool>,
    registry: Arc<dyn HostRegistry>,
    credentials: Arc<dyn CredentialStore>,
    connect_params: ConnectParams,
    config: RwLock<QueueConfig>,
    chunked: ChunkedTransferManager,
    queue_paused: AtomicBool,
    /// Serializes scheduling passes so only one pass mutates the running set
    schedule_gate: Mutex<()>,
    progress_sinks: RwLock<Vec<Arc<dyn ProgressSink>>>,
    history_sinks: RwLock<Vec<Arc<dyn HistorySink>>>,
    observers: RwLock<Vec<Arc<dyn QueueObserver>>>,
    shutdown: CancellationToken,
}

/// Transfer queue handle. Cheap to clone; all clones share one queue.
#[derive(Clone)]
pub struct TransferQueue {
    inner: Arc<QueueInner>,
}

impl TransferQueue {
    pub fn new(
        pool: Arc<SessionPool>,
        registry: Arc<dyn HostRegistry>,
        credentials: Arc<dyn CredentialStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                tasks: RwLock::new(HashMap::new()),
                pool,
                registry,
                credentials,
                connect_params: ConnectParams::default(),
                config: RwLock::new(config.queue.clone()),
                chunked: ChunkedTransferManager::new(config.chunked.clone()),
                queue_paused: AtomicBool::new(false),
                schedule_gate: Mutex::new(()),
                progress_sinks: RwLock::new(Vec::new()),
                history_sinks: RwLock::new(Vec::new()),
                observers: RwLock::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Register a consumer of progress updates
    pub async fn register_progress_sink(&self, sink: Arc<dyn ProgressSink>) {
        self.inner.progress_sinks.write().await.push(sink);
    }

    /// Register the durable-history collaborator
    pub async fn register_history_sink(&self, sink: Arc<dyn HistorySink>) {
        self.inner.history_sinks.write().await.push(sink);
    }

    /// Register an observer of queue lifecycle events
    pub async fn register_observer(&self, observer: Arc<dyn QueueObserver>) {
        self.inner.observers.write().await.push(observer);
    }

    /// Build a task with the queue's retry settings applied
    pub async fn make_task(
        &self,
        direction: TransferDirection,
        host: impl Into<String>,
        local_path: PathBuf,
        remote_path: impl Into<String>,
        size: Option<u64>,
    ) -> TransferTask {
        let max_retries = self.inner.config.read().await.retry.max_retries;
        TransferTask::new(direction, host, local_path, remote_path, size, max_retries)
    }

    /// Accept a task into the queue and run a scheduling pass
    pub async fn add_task(&self, task: TransferTask) -> TaskId {
        let id = task.id;
        self.inner.tasks.write().await.insert(id, task);
        self.inner.notify(QueueEvent::TaskAdded { task_id: id }).await;
        QueueInner::schedule(&self.inner).await;
        id
    }

    /// Bulk accept; a single scheduling pass at the end
    pub async fn add_tasks(&self, tasks: Vec<TransferTask>) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(tasks.len());
        {
            let mut map = self.inner.tasks.write().await;
            for task in tasks {
                ids.push(task.id);
                map.insert(task.id, task);
            }
        }
        for id in &ids {
            self.inner.notify(QueueEvent::TaskAdded { task_id: *id }).await;
        }
        QueueInner::schedule(&self.inner).await;
        ids
    }

    /// Pause a running task. Its in-flight operation aborts cooperatively
    /// and the task keeps its transferred bytes for a later resume.
    pub async fn pause_task(&self, id: TaskId) -> Result<()> {
        let mut tasks = self.inner.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| TransferError::TaskNotFound {
                task_id: id.to_string(),
            })?;
        if task.status != TaskStatus::Running {
            return Err(TransferError::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::Paused.to_string(),
            });
        }
        task.request_abort(AbortIntent::Pause);
        Ok(())
    }

    /// Re-queue a paused task. It continues from where it stopped rather
    /// than restarting.
    pub async fn resume_task(&self, id: TaskId) -> Result<()> {
        {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks
                .get_mut(&id)
                .ok_or_else(|| TransferError::TaskNotFound {
                    task_id: id.to_string(),
                })?;
            task.requeue_for_resume()?;
        }
        self.inner
            .notify(QueueEvent::StatusChanged {
                task_id: id,
                status: TaskStatus::Pending,
            })
            .await;
        QueueInner::schedule(&self.inner).await;
        Ok(())
    }

    /// Cancel a task. A running task aborts cooperatively; a queued or
    /// paused one is finalized immediately. Partial artifacts are removed
    /// on a best-effort basis.
    pub async fn cancel_task(&self, id: TaskId) -> Result<()> {
        let finalized = {
            let mut tasks = self.inner.tasks.write().await;
            let task = tasks
                .get_mut(&id)
                .ok_or_else(|| TransferError::TaskNotFound {
                    task_id: id.to_string(),
                })?;
            match task.status {
                TaskStatus::Running => {
                    task.request_abort(AbortIntent::Cancel);
                    None
                }
                _ => {
                    task.cancel_task()?;
                    Some(task.clone())
                }
            }
        };
        if let Some(task) = finalized {
            self.inner
                .notify(QueueEvent::StatusChanged {
                    task_id: id,
                    status: TaskStatus::Cancelled,
                })
                .await;
            self.inner.record_history(&task).await;
            self.inner.cleanup_partial(&task).await;
        }
        Ok(())
    }

    /// Drop a task from the live set. A running task is cancelled first.
    pub async fn remove_task(&self, id: TaskId) -> Result<()> {
        let removed = {
            let mut tasks = self.inner.tasks.write().await;
            match tasks.get_mut(&id) {
                Some(task) => {
                    if task.status == TaskStatus::Running {
                        task.request_abort(AbortIntent::Cancel);
                    }
                    tasks.remove(&id)
                }
                None => {
                    return Err(TransferError::TaskNotFound {
                        task_id: id.to_string(),
                    })
                }
            }
        };
        if removed.is_some() {
            self.inner.notify(QueueEvent::TaskRemoved { task_id: id }).await;
        }
        Ok(())
    }

    /// Pause the whole queue: every running task is paused and scheduling
    /// is suppressed until resumed.
    pub async fn pause_queue(&self) {
        self.inner.queue_paused.store(true, Ordering::SeqCst);
        {
            let mut tasks = self.inner.tasks.write().await;
            for task in tasks.values_mut() {
                if task.status == TaskStatus::Running {
                    task.paused_by_queue = true;
                    task.request_abort(AbortIntent::Pause);
                }
            }
        }
        info!("queue: paused");
        self.inner.notify(QueueEvent::QueuePaused).await;
    }

    /// Resume the queue, re-queueing the tasks the queue pause stopped
    pub async fn resume_queue(&self) {
        self.inner.queue_paused.store(false, Ordering::SeqCst);
        {
            let mut tasks = self.inner.tasks.write().await;
            for task in tasks.values_mut() {
                if task.status == TaskStatus::Paused && task.paused_by_queue {
                    // Tasks paused individually stay paused.
                    let _ = task.requeue_for_resume();
                }
            }
        }
        info!("queue: resumed");
        self.inner.notify(QueueEvent::QueueResumed).await;
        QueueInner::schedule(&self.inner).await;
    }

    /// Remove every task in a terminal state
    pub async fn clear_completed(&self) -> usize {
        let removed: Vec<TaskId> = {
            let mut tasks = self.inner.tasks.write().await;
            let ids: Vec<TaskId> = tasks
                .values()
                .filter(|t| t.status.is_terminal())
                .map(|t| t.id)
                .collect();
            for id in &ids {
                tasks.remove(id);
            }
            ids
        };
        for id in &removed {
            self.inner.notify(QueueEvent::TaskRemoved { task_id: *id }).await;
        }
        removed.len()
    }

    /// Cancel everything in flight and empty the queue
    pub async fn clear_all(&self) -> usize {
        let removed: Vec<TaskId> = {
            let mut tasks = self.inner.tasks.write().await;
            for task in tasks.values_mut() {
                if task.status == TaskStatus::Running {
                    task.request_abort(AbortIntent::Cancel);
                }
            }
            let ids: Vec<TaskId> = tasks.keys().copied().collect();
            tasks.clear();
            ids
        };
        for id in &removed {
            self.inner.notify(QueueEvent::TaskRemoved { task_id: *id }).await;
        }
        removed.len()
    }

    /// Aggregate counters over the live task set
    pub async fn stats(&self) -> QueueStats {
        let tasks = self.inner.tasks.read().await;
        let mut stats = QueueStats {
            total: tasks.len(),
            ..Default::default()
        };
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Paused => stats.paused += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
            stats.total_bytes += task.size.unwrap_or(0);
            stats.transferred_bytes += task.transferred;
        }
        stats
    }

    /// Change the concurrency bound (floor 1) and re-run scheduling
    pub async fn set_max_concurrent(&self, n: usize) {
        self.inner.config.write().await.max_concurrent = n.max(1);
        QueueInner::schedule(&self.inner).await;
    }

    pub async fn set_retry_policy(&self, policy: RetryPolicy) {
        self.inner.config.write().await.retry = policy;
    }

    pub async fn task(&self, id: TaskId) -> Option<TransferTask> {
        self.inner.tasks.read().await.get(&id).cloned()
    }

    pub async fn tasks(&self) -> Vec<TransferTask> {
        self.inner.tasks.read().await.values().cloned().collect()
    }

    /// Stop scheduling and abort all in-flight work
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut tasks = self.inner.tasks.write().await;
        for task in tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.request_abort(AbortIntent::Cancel);
            }
        }
    }
}

impl QueueInner {
    /// One scheduling pass. Serialized on the gate so two passes can never
    /// double-start a task; only this function moves tasks into Running.
    // Returns an explicitly-typed boxed future rather than an `async fn` so the
    // future has no opaque (auto-trait-inferred) type. `schedule` spawns
    // `run_task`, which re-enters `schedule`; with an opaque return type that
    // recursion forms a `Send` auto-trait inference cycle the compiler cannot
    // resolve within one module. A named `dyn Future + Send` return type breaks
    // the cycle without changing behavior.
    fn schedule(
        inner: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        let inner = Arc::clone(inner);
        Box::pin(async move {
        let inner = &inner;
        let _gate = inner.schedule_gate.lock().await;
        if inner.shutdown.is_cancelled() || inner.queue_paused.load(Ordering::SeqCst) {
            return;
        }
        loop {
            let max_concurrent = inner.config.read().await.max_concurrent;
            let spec = {
                let mut tasks = inner.tasks.write().await;
                let running = tasks
                    .values()
                    .filter(|t| t.status == TaskStatus::Running)
                    .count();
                if running >= max_concurrent {
                    break;
                }
                // Priority descending, then creation order ascending
                let next = tasks
                    .values()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .max_by_key(|t| (t.priority, Reverse(t.seq)))
                    .map(|t| t.id);
                let Some(id) = next else { break };
                let task = tasks.get_mut(&id).expect("picked task exists");
                if task.start().is_err() {
                    continue;
                }
                RunSpec {
                    id,
                    direction: task.direction,
                    host: task.host.clone(),
                    local_path: task.local_path.clone(),
                    remote_path: task.remote_path.clone(),
                    size: task.size,
                    resume_offset: task.resume_offset,
                    cancel: task.cancel.clone(),
                }
            };
            inner
                .notify(QueueEvent::StatusChanged {
                    task_id: spec.id,
                    status: TaskStatus::Running,
                })
                .await;
            let inner_clone = Arc::clone(inner);
            tokio::spawn(async move {
                QueueInner::run_task(inner_clone, spec).await;
            });
        }
        })
    }

    async fn run_task(inner: Arc<Self>, spec: RunSpec) {
        let id = spec.id;
        debug!("queue: task {} starting", id);
        let result = QueueInner::execute(&inner, spec).await;
        QueueInner::finalize(&inner, id, result).await;
        QueueInner::schedule(&inner).await;
    }

    /// Resolve the host, discover size if needed, and run the transfer
    /// through the pool (whole-file) or the chunk manager (large files).
    async fn execute(inner: &Arc<Self>, spec: RunSpec) -> Result<u64> {
        let info = inner
            .registry
            .lookup(&spec.host)
            .ok_or_else(|| TransferError::UnknownHost {
                host_id: spec.host.clone(),
            })?;
        let auth = inner
            .credentials
            .lookup(&spec.host)
            .ok_or_else(|| TransferError::MissingCredentials {
                host_id: spec.host.clone(),
            })?;
        let identity = info.identity();

        // Size discovery. Uploads read local metadata; downloads stat the
        // remote file over a pooled session.
        let size = match spec.size {
            Some(size) => size,
            None => {
                let size = match spec.direction {
                    TransferDirection::Upload => tokio::fs::metadata(&spec.local_path)
                        .await
                        .map_err(|e| TransferError::Io {
                            path: spec.local_path.clone(),
                            source: e,
                        })?
                        .len(),
                    TransferDirection::Download => {
                        let lease = inner
                            .pool
                            .acquire(&identity, &auth, &inner.connect_params)
                            .await?;
                        let stat = lease.session.stat(&spec.remote_path).await;
                        match stat {
                            Ok(meta) => {
                                inner.pool.release(lease).await;
                                meta.size
                            }
                            Err(e) => {
                                inner.return_lease(lease, &e).await;
                                return Err(e);
                            }
                        }
                    }
                };
                inner.set_task_size(spec.id, size).await;
                size
            }
        };

        // Progress relay: operations report through a channel; this side
        // folds reports into the task and fans them out to sinks.
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let relay = tokio::spawn(QueueInner::relay_progress(
            Arc::clone(inner),
            spec.id,
            size,
            events_rx,
        ));

        let outcome = if inner.chunked.should_chunk(size, spec.resume_offset) {
            inner
                .chunked
                .transfer(
                    ChunkedRequest {
                        pool: Arc::clone(&inner.pool),
                        identity,
                        auth,
                        params: inner.connect_params.clone(),
                        direction: spec.direction,
                        local_path: spec.local_path.clone(),
                        remote_path: spec.remote_path.clone(),
                        size,
                    },
                    events_tx,
                    spec.cancel.clone(),
                )
                .await
        } else {
            QueueInner::whole_transfer(inner, &spec, &identity, &auth, events_tx).await
        };

        // Channel sender dropped above; drain completes.
        let _ = relay.await;
        outcome
    }

    /// Single-session transfer of the full remaining byte range
    async fn whole_transfer(
        inner: &Arc<Self>,
        spec: &RunSpec,
        identity: &HostIdentity,
        auth: &AuthMethod,
        events: mpsc::UnboundedSender<ProgressEvent>,
    ) -> Result<u64> {
        let lease = inner
            .pool
            .acquire(identity, auth, &inner.connect_params)
            .await?;
        let base = spec.resume_offset;
        let progress: ProgressFn = Arc::new(move |bytes| {
            let _ = events.send(ProgressEvent::Bytes(base + bytes));
        });
        let range = ByteRange::from_offset(base);
        let result = match spec.direction {
            TransferDirection::Download => {
                lease
                    .session
                    .download(
                        &spec.remote_path,
                        &spec.local_path,
                        range,
                        progress,
                        spec.cancel.clone(),
                    )
                    .await
            }
            TransferDirection::Upload => {
                lease
                    .session
                    .upload(
                        &spec.local_path,
                        &spec.remote_path,
                        range,
                        progress,
                        spec.cancel.clone(),
                    )
                    .await
            }
        };
        match result {
            Ok(moved) => {
                inner.pool.release(lease).await;
                Ok(base + moved)
            }
            Err(e) => {
                inner.return_lease(lease, &e).await;
                Err(e)
            }
        }
    }

    async fn return_lease(&self, lease: SessionLease, error: &TransferError) {
        if error.is_session_fatal() {
            self.pool.discard(lease).await;
        } else {
            self.pool.release(lease).await;
        }
    }

    /// Fold operation progress into the task and fan out to sinks
    async fn relay_progress(
        inner: Arc<Self>,
        id: TaskId,
        size: u64,
        mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    ) {
        let mut speed_tracker = SpeedTracker::new();
        while let Some(event) = events.recv().await {
            let (transferred, chunks) = match event {
                ProgressEvent::Bytes(total) => (total, None),
                ProgressEvent::Chunked { total, chunks } => (total, Some(chunks)),
            };
            let speed = speed_tracker.record(transferred);

            let update = {
                let mut tasks = inner.tasks.write().await;
                let Some(task) = tasks.get_mut(&id) else {
                    continue;
                };
                task.record_progress(transferred, speed);
                if let Some(chunks) = chunks {
                    task.chunks = Some(chunks);
                }
                ProgressUpdate {
                    task_id: id,
                    transferred: task.transferred,
                    total: Some(size),
                    speed,
                    chunk_progress: task.chunks.clone(),
                }
            };

            let sinks = inner.progress_sinks.read().await;
            for sink in sinks.iter() {
                sink.update(update.clone());
            }
        }
    }

    /// Classify the run outcome. The retry decision is made here and
    /// nowhere else.
    async fn finalize(inner: &Arc<Self>, id: TaskId, result: Result<u64>) {
        let policy = inner.config.read().await.retry.clone();

        enum Outcome {
            Done(TransferTask),
            PausedTask,
            CancelledTask(TransferTask),
            Retry(std::time::Duration),
            PermanentFailure(TransferTask),
        }

        let outcome = {
            let mut tasks = inner.tasks.write().await;
            let Some(task) = tasks.get_mut(&id) else {
                // Removed while running; nothing to finalize.
                return;
            };
            match result {
                Ok(_) => {
                    if task.complete().is_err() {
                        // Status changed under us (cancel raced completion).
                        return;
                    }
                    Outcome::Done(task.clone())
                }
                Err(TransferError::Aborted) => match task.abort_intent() {
                    AbortIntent::Pause => {
                        let _ = task.pause();
                        Outcome::PausedTask
                    }
                    _ => {
                        let _ = task.cancel_task();
                        Outcome::CancelledTask(task.clone())
                    }
                },
                Err(e) => {
                    let message = e.to_string();
                    let _ = task.fail(message.clone());
                    if policy.enabled && e.is_retryable() && task.increment_retry() {
                        let delay = task.retry_delay(&policy);
                        info!(
                            "queue: task {} failed ({}), retry {}/{} in {:?}",
                            id, message, task.retry_count, task.max_retries, delay
                        );
                        Outcome::Retry(delay)
                    } else {
                        warn!("queue: task {} failed permanently: {}", id, message);
                        if task.retry_count > 0 {
                            task.record_error(
                                TransferError::RetryExhausted {
                                    attempts: task.retry_count,
                                    last_error: message,
                                }
                                .to_string(),
                            );
                        }
                        Outcome::PermanentFailure(task.clone())
                    }
                }
            }
        };

        match outcome {
            Outcome::Done(task) => {
                debug!("queue: task {} completed", id);
                inner
                    .notify(QueueEvent::StatusChanged {
                        task_id: id,
                        status: TaskStatus::Completed,
                    })
                    .await;
                inner.record_history(&task).await;
            }
            Outcome::PausedTask => {
                debug!("queue: task {} paused", id);
                inner
                    .notify(QueueEvent::StatusChanged {
                        task_id: id,
                        status: TaskStatus::Paused,
                    })
                    .await;
            }
            Outcome::CancelledTask(task) => {
                debug!("queue: task {} cancelled", id);
                inner
                    .notify(QueueEvent::StatusChanged {
                        task_id: id,
                        status: TaskStatus::Cancelled,
                    })
                    .await;
                inner.record_history(&task).await;
                inner.cleanup_partial(&task).await;
            }
            Outcome::Retry(delay) => {
                inner
                    .notify(QueueEvent::StatusChanged {
                        task_id: id,
                        status: TaskStatus::Failed,
                    })
                    .await;
                // Deferred re-entry: nothing is held during the backoff.
                let inner_clone = Arc::clone(inner);
                tokio::spawn(async move {
                    tokio::select! {
                        _ = inner_clone.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    {
                        let mut tasks = inner_clone.tasks.write().await;
                        let Some(task) = tasks.get_mut(&id) else { return };
                        if task.requeue_for_retry().is_err() {
                            // Cancelled or removed while waiting.
                            return;
                        }
                    }
                    inner_clone
                        .notify(QueueEvent::StatusChanged {
                            task_id: id,
                            status: TaskStatus::Pending,
                        })
                        .await;
                    QueueInner::schedule(&inner_clone).await;
                });
            }
            Outcome::PermanentFailure(task) => {
                inner
                    .notify(QueueEvent::StatusChanged {
                        task_id: id,
                        status: TaskStatus::Failed,
                    })
                    .await;
                inner.record_history(&task).await;
            }
        }
    }

    async fn set_task_size(&self, id: TaskId, size: u64) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(&id) {
            task.set_size(size);
        }
    }

    /// Best-effort removal of the incomplete artifact of a cancelled
    /// transfer. Failures are logged, never propagated.
    async fn cleanup_partial(&self, task: &TransferTask) {
        if task.transferred == 0 && task.resume_offset == 0 {
            return;
        }
        match task.direction {
            TransferDirection::Download => {
                if let Err(e) = tokio::fs::remove_file(&task.local_path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            "queue: removing partial download {} failed: {}",
                            task.local_path.display(),
                            e
                        );
                    }
                }
            }
            TransferDirection::Upload => {
                let Some(info) = self.registry.lookup(&task.host) else {
                    return;
                };
                let Some(auth) = self.credentials.lookup(&task.host) else {
                    return;
                };
                match self
                    .pool
                    .acquire(&info.identity(), &auth, &self.connect_params)
                    .await
                {
                    Ok(lease) => {
                        if let Err(e) = lease.session.delete(&task.remote_path).await {
                            warn!(
                                "queue: removing partial upload {} failed: {}",
                                task.remote_path, e
                            );
                        }
                        self.pool.release(lease).await;
                    }
                    Err(e) => {
                        warn!("queue: no session to clean up {}: {}", task.remote_path, e);
                    }
                }
            }
        }
    }

    async fn record_history(&self, task: &TransferTask) {
        let record = TransferRecord::from_task(task);
        let sinks = self.history_sinks.read().await;
        for sink in sinks.iter() {
            sink.record(record.clone());
        }
    }

    async fn notify(&self, event: QueueEvent) {
        let observers = self.observers.read().await;
        for observer in observers.iter() {
            observer.on_event(event.clone());
        }
    }
}
