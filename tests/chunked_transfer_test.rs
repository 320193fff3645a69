// Integration tests for chunked parallel transfers through the queue

mod common;

use common::{single_host, MockConnector, MockFile};
use hakobu::{
    EngineConfig, ProgressUpdate, SessionPool, TaskStatus, TransferDirection, TransferQueue,
    TransferTask,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const HOST: &str = "chunk-host";

fn chunked_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.queue.max_concurrent = 2;
    config.queue.retry.enabled = false;
    config.chunked.enabled = true;
    config.chunked.threshold = 10 * 1024;
    config.chunked.chunk_size = 4 * 1024;
    config.chunked.max_concurrent = 3;
    config.chunked.preserve_attributes = false;
    config
}

struct Harness {
    connector: Arc<MockConnector>,
    queue: TransferQueue,
    dir: TempDir,
}

fn harness(config: EngineConfig) -> Harness {
    let connector = Arc::new(MockConnector::new());
    connector.behavior.step_bytes.store(1024, Ordering::SeqCst);
    let pool = Arc::new(SessionPool::new(connector.clone(), config.pool.clone()));
    let (registry, credentials) = single_host(HOST);
    let queue = TransferQueue::new(pool, Arc::new(registry), Arc::new(credentials), &config);
    Harness {
        connector,
        queue,
        dir: TempDir::new().unwrap(),
    }
}

async fn wait_for_status(
    queue: &TransferQueue,
    id: hakobu::transfer::TaskId,
    status: TaskStatus,
) -> TransferTask {
    for _ in 0..500 {
        if let Some(task) = queue.task(id).await {
            if task.status == status {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {:?}", id, status);
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 239) as u8).collect()
}

#[tokio::test]
async fn test_chunked_upload_reassembles_correctly() {
    let h = harness(chunked_config());
    let data = payload(50 * 1024);
    let local = h.dir.path().join("large.bin");
    std::fs::write(&local, &data).unwrap();

    let task = TransferTask::new(
        TransferDirection::Upload,
        HOST,
        local,
        "/srv/large.bin",
        Some(data.len() as u64),
        0,
    );
    let id = h.queue.add_task(task).await;

    let done = wait_for_status(&h.queue, id, TaskStatus::Completed).await;
    assert_eq!(done.transferred, data.len() as u64);

    // The run was chunked: ceil(50 KiB / 4 KiB) = 13 ranges, all complete
    let chunks = done.chunks.expect("per-chunk progress recorded");
    assert_eq!(chunks.len(), 13);
    assert!(chunks
        .iter()
        .all(|c| c.status == hakobu::transfer::ChunkStatus::Completed));
    assert_eq!(
        chunks.iter().map(|c| c.transferred).sum::<u64>(),
        data.len() as u64
    );

    assert_eq!(h.connector.fs.get("/srv/large.bin").unwrap().data, data);
}

#[tokio::test]
async fn test_chunked_download_reassembles_correctly() {
    let h = harness(chunked_config());
    let data = payload(40 * 1024);
    h.connector
        .fs
        .insert("/srv/blob.bin", MockFile::file(data.clone()));

    let local = h.dir.path().join("blob.bin");
    let task = TransferTask::new(
        TransferDirection::Download,
        HOST,
        local.clone(),
        "/srv/blob.bin",
        None,
        0,
    );
    let id = h.queue.add_task(task).await;

    wait_for_status(&h.queue, id, TaskStatus::Completed).await;
    assert_eq!(std::fs::read(&local).unwrap(), data);
}

#[tokio::test]
async fn test_small_file_is_not_chunked() {
    let h = harness(chunked_config());
    let data = payload(8 * 1024);
    let local = h.dir.path().join("small.bin");
    std::fs::write(&local, &data).unwrap();

    let task = TransferTask::new(
        TransferDirection::Upload,
        HOST,
        local,
        "/srv/small.bin",
        Some(data.len() as u64),
        0,
    );
    let id = h.queue.add_task(task).await;

    let done = wait_for_status(&h.queue, id, TaskStatus::Completed).await;
    assert!(done.chunks.is_none(), "8 KiB is under the chunk threshold");
}

#[tokio::test]
async fn test_chunk_progress_reaches_sinks() {
    let h = harness(chunked_config());
    let updates: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let updates = Arc::clone(&updates);
        h.queue
            .register_progress_sink(Arc::new(move |u: ProgressUpdate| {
                updates.lock().unwrap().push(u);
            }))
            .await;
    }

    let data = payload(30 * 1024);
    let local = h.dir.path().join("watched.bin");
    std::fs::write(&local, &data).unwrap();
    let id = h
        .queue
        .add_task(TransferTask::new(
            TransferDirection::Upload,
            HOST,
            local,
            "/srv/watched.bin",
            Some(data.len() as u64),
            0,
        ))
        .await;
    wait_for_status(&h.queue, id, TaskStatus::Completed).await;

    let updates = updates.lock().unwrap();
    assert!(updates.iter().any(|u| u.chunk_progress.is_some()));
    // Every chunked update keeps the sum invariant
    for update in updates.iter() {
        if let Some(chunks) = &update.chunk_progress {
            assert_eq!(
                chunks.iter().map(|c| c.transferred).sum::<u64>(),
                update.transferred
            );
        }
    }
}

#[tokio::test]
async fn test_single_chunk_failure_fails_the_task() {
    let h = harness(chunked_config());
    h.connector.behavior.step_delay_ms.store(2, Ordering::SeqCst);
    h.connector.behavior.fail_transfers.store(1, Ordering::SeqCst);

    let data = payload(50 * 1024);
    let local = h.dir.path().join("broken.bin");
    std::fs::write(&local, &data).unwrap();
    let id = h
        .queue
        .add_task(TransferTask::new(
            TransferDirection::Upload,
            HOST,
            local,
            "/srv/broken.bin",
            Some(data.len() as u64),
            0,
        ))
        .await;

    let failed = wait_for_status(&h.queue, id, TaskStatus::Failed).await;
    assert!(failed.error.unwrap().contains("mock transfer failure"));
    let chunks = failed.chunks.expect("chunk states recorded");
    assert!(chunks
        .iter()
        .any(|c| c.status == hakobu::transfer::ChunkStatus::Failed));
}

#[tokio::test]
async fn test_integrity_mismatch_surfaces_as_failure() {
    let mut config = chunked_config();
    config.chunked.verify_checksum = true;
    let h = harness(config);
    h.connector
        .behavior
        .corrupt_checksum
        .store(1, Ordering::SeqCst);

    let data = payload(20 * 1024);
    let local = h.dir.path().join("verified.bin");
    std::fs::write(&local, &data).unwrap();
    let id = h
        .queue
        .add_task(TransferTask::new(
            TransferDirection::Upload,
            HOST,
            local,
            "/srv/verified.bin",
            Some(data.len() as u64),
            0,
        ))
        .await;

    let failed = wait_for_status(&h.queue, id, TaskStatus::Failed).await;
    assert!(failed.error.unwrap().contains("Integrity check failed"));
    // The partial output is kept for a retry to overwrite
    assert!(h.connector.fs.contains("/srv/verified.bin"));
}

#[tokio::test]
async fn test_integrity_passes_with_honest_remote() {
    let mut config = chunked_config();
    config.chunked.verify_checksum = true;
    let h = harness(config);

    let data = payload(20 * 1024);
    let local = h.dir.path().join("honest.bin");
    std::fs::write(&local, &data).unwrap();
    let id = h
        .queue
        .add_task(TransferTask::new(
            TransferDirection::Upload,
            HOST,
            local,
            "/srv/honest.bin",
            Some(data.len() as u64),
            0,
        ))
        .await;

    wait_for_status(&h.queue, id, TaskStatus::Completed).await;
}

#[tokio::test]
async fn test_chunked_transfer_respects_pool_bound() {
    let mut config = chunked_config();
    config.pool.max_connections = 2;
    config.chunked.max_concurrent = 8;
    let h = harness(config);

    let data = payload(60 * 1024);
    let local = h.dir.path().join("bounded.bin");
    std::fs::write(&local, &data).unwrap();
    let id = h
        .queue
        .add_task(TransferTask::new(
            TransferDirection::Upload,
            HOST,
            local,
            "/srv/bounded.bin",
            Some(data.len() as u64),
            0,
        ))
        .await;

    wait_for_status(&h.queue, id, TaskStatus::Completed).await;
    // Chunks outnumbered the session budget; the pool held the line
    assert!(h.connector.connects.load(Ordering::SeqCst) <= 2);
    assert_eq!(h.connector.fs.get("/srv/bounded.bin").unwrap().data, data);
}
