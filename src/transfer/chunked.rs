// Chunked Parallel Transfer Manager
//
// Splits a large transfer into byte-range chunks and moves them
// concurrently over sessions leased from the pool.

use crate::config::ChunkConfig;
use crate::error::{Result, TransferError};
use crate::remote::identity::{AuthMethod, HostIdentity};
use crate::remote::{ByteRange, ConnectParams, ProgressFn, SessionPool};
use crate::transfer::progress::ProgressEvent;
use crate::transfer::types::{ChunkState, ChunkStatus, TransferDirection};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Everything one chunked run needs, owned so chunk tasks can be spawned
pub struct ChunkedRequest {
    pub pool: Arc<SessionPool>,
    pub identity: HostIdentity,
    pub auth: AuthMethod,
    pub params: ConnectParams,
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub size: u64,
}

/// Chunked parallel transfer manager
pub struct ChunkedTransferManager {
    config: ChunkConfig,
}

impl ChunkedTransferManager {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// A transfer is chunked only when parallel transfer is enabled, the
    /// file is past the threshold, and the run is not resuming from a
    /// nonzero offset.
    pub fn should_chunk(&self, size: u64, resume_offset: u64) -> bool {
        self.config.enabled && size > self.config.threshold && resume_offset == 0
    }

    /// Split `size` bytes into `ceil(size / chunk_size)` contiguous ranges
    pub fn plan(size: u64, chunk_size: u64) -> Vec<ChunkState> {
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        let mut index = 0usize;
        while offset < size {
            let end = (offset + chunk_size).min(size);
            chunks.push(ChunkState::new(index, offset, end));
            offset = end;
            index += 1;
        }
        chunks
    }

    /// Run a chunked transfer. Returns total bytes moved.
    ///
    /// The first chunk failure cancels the remaining chunks and fails the
    /// whole run; any retry happens at the queue so the retry decision is
    /// made exactly once. On an integrity mismatch the partial output is
    /// left in place for the retry to overwrite.
    pub async fn transfer(
        &self,
        request: ChunkedRequest,
        events: UnboundedSender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<u64> {
        let chunks = Self::plan(request.size, self.config.chunk_size);
        debug!(
            "chunked: {} bytes in {} chunk(s) for {}",
            request.size,
            chunks.len(),
            request.remote_path
        );

        let states = Arc::new(StdMutex::new(chunks.clone()));
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        // Child scope so one failed chunk can abort its siblings without
        // touching the task-level token.
        let scope = cancel.child_token();

        let mut join_set = JoinSet::new();
        for chunk in chunks {
            let request_pool = Arc::clone(&request.pool);
            let identity = request.identity.clone();
            let auth = request.auth.clone();
            let params = request.params.clone();
            let local_path = request.local_path.clone();
            let remote_path = request.remote_path.clone();
            let direction = request.direction;
            let states = Arc::clone(&states);
            let semaphore = Arc::clone(&semaphore);
            let events = events.clone();
            let scope = scope.clone();

            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| TransferError::Aborted)?;
                if scope.is_cancelled() {
                    return Err(TransferError::Aborted);
                }

                let index = chunk.index;
                set_status(&states, &events, index, ChunkStatus::Transferring);

                let lease = match request_pool.acquire(&identity, &auth, &params).await {
                    Ok(lease) => lease,
                    Err(e) => {
                        set_status(&states, &events, index, ChunkStatus::Failed);
                        scope.cancel();
                        return Err(e);
                    }
                };
                let range = ByteRange::slice(chunk.offset, chunk.size);

                let progress: ProgressFn = {
                    let states = Arc::clone(&states);
                    let events = events.clone();
                    Arc::new(move |bytes| {
                        let snapshot = {
                            let mut guard = states.lock().expect("chunk state lock");
                            if let Some(state) = guard.get_mut(index) {
                                state.transferred = bytes.min(state.size);
                            }
                            guard.clone()
                        };
                        let total = snapshot.iter().map(|c| c.transferred).sum();
                        let _ = events.send(ProgressEvent::Chunked {
                            total,
                            chunks: snapshot,
                        });
                    })
                };

                let result = match direction {
                    TransferDirection::Download => {
                        lease
                            .session
                            .download(&remote_path, &local_path, range, progress, scope.clone())
                            .await
                    }
                    TransferDirection::Upload => {
                        lease
                            .session
                            .upload(&local_path, &remote_path, range, progress, scope.clone())
                            .await
                    }
                };

                match result {
                    Ok(_) => {
                        request_pool.release(lease).await;
                        set_status(&states, &events, index, ChunkStatus::Completed);
                        Ok(())
                    }
                    Err(e) => {
                        if e.is_session_fatal() {
                            request_pool.discard(lease).await;
                        } else {
                            request_pool.release(lease).await;
                        }
                        if !matches!(e, TransferError::Aborted) {
                            set_status(&states, &events, index, ChunkStatus::Failed);
                            // Abort siblings; the queue sees one failure.
                            scope.cancel();
                        }
                        Err(e)
                    }
                }
            });
        }

        let mut first_error: Option<TransferError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    // Prefer the originating failure over the Aborted errors
                    // from the chunks it cancelled.
                    match (&first_error, &e) {
                        (None, _) => first_error = Some(e),
                        (Some(TransferError::Aborted), other)
                            if !matches!(other, TransferError::Aborted) =>
                        {
                            first_error = Some(e)
                        }
                        _ => {}
                    }
                }
                Err(join_err) => {
                    if first_error.is_none() {
                        first_error =
                            Some(TransferError::Other(anyhow::anyhow!(
                                "chunk task panicked: {join_err}"
                            )));
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let moved = {
            let guard = states.lock().expect("chunk state lock");
            guard.iter().map(|c| c.transferred).sum()
        };

        if self.config.verify_checksum {
            self.verify(&request).await?;
        }
        if self.config.preserve_attributes {
            self.preserve_attributes(&request).await;
        }

        Ok(moved)
    }

    /// Compare source and destination SHA-256. Skipped when the remote side
    /// cannot produce a checksum.
    async fn verify(&self, request: &ChunkedRequest) -> Result<()> {
        let lease = request
            .pool
            .acquire(&request.identity, &request.auth, &request.params)
            .await?;
        let remote = lease.session.checksum(&request.remote_path).await;
        let remote = match remote {
            Ok(r) => {
                request.pool.release(lease).await;
                r
            }
            Err(e) => {
                if e.is_session_fatal() {
                    request.pool.discard(lease).await;
                } else {
                    request.pool.release(lease).await;
                }
                return Err(e);
            }
        };

        let Some(remote_hex) = remote else {
            debug!(
                "chunked: remote cannot checksum {}, skipping verification",
                request.remote_path
            );
            return Ok(());
        };

        let local_hex = sha256_file(&request.local_path).await?;
        if local_hex != remote_hex {
            let (expected, actual) = match request.direction {
                TransferDirection::Upload => (local_hex, remote_hex),
                TransferDirection::Download => (remote_hex, local_hex),
            };
            return Err(TransferError::Integrity {
                path: request.remote_path.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Carry permissions over to the destination. Failures are logged and
    /// never fail the transfer.
    async fn preserve_attributes(&self, request: &ChunkedRequest) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            match request.direction {
                TransferDirection::Upload => {
                    let mode = match tokio::fs::metadata(&request.local_path).await {
                        Ok(meta) => meta.permissions().mode() & 0o7777,
                        Err(e) => {
                            warn!(
                                "chunked: stat {} for attributes failed: {}",
                                request.local_path.display(),
                                e
                            );
                            return;
                        }
                    };
                    match request
                        .pool
                        .acquire(&request.identity, &request.auth, &request.params)
                        .await
                    {
                        Ok(lease) => {
                            if let Err(e) = lease
                                .session
                                .set_permissions(&request.remote_path, mode)
                                .await
                            {
                                warn!(
                                    "chunked: preserving permissions on {} failed: {}",
                                    request.remote_path, e
                                );
                            }
                            request.pool.release(lease).await;
                        }
                        Err(e) => {
                            warn!("chunked: no session for attribute pass: {}", e);
                        }
                    }
                }
                TransferDirection::Download => {
                    let mode = match request
                        .pool
                        .acquire(&request.identity, &request.auth, &request.params)
                        .await
                    {
                        Ok(lease) => {
                            let stat = lease.session.stat(&request.remote_path).await;
                            request.pool.release(lease).await;
                            match stat {
                                Ok(meta) => meta.permissions,
                                Err(e) => {
                                    warn!(
                                        "chunked: stat {} for attributes failed: {}",
                                        request.remote_path, e
                                    );
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            warn!("chunked: no session for attribute pass: {}", e);
                            return;
                        }
                    };
                    if let Some(mode) = mode {
                        let permissions = std::fs::Permissions::from_mode(mode & 0o7777);
                        if let Err(e) =
                            tokio::fs::set_permissions(&request.local_path, permissions).await
                        {
                            warn!(
                                "chunked: preserving permissions on {} failed: {}",
                                request.local_path.display(),
                                e
                            );
                        }
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = request;
        }
    }
}

fn set_status(
    states: &Arc<StdMutex<Vec<ChunkState>>>,
    events: &UnboundedSender<ProgressEvent>,
    index: usize,
    status: ChunkStatus,
) {
    let snapshot = {
        let mut guard = states.lock().expect("chunk state lock");
        if let Some(state) = guard.get_mut(index) {
            state.status = status;
            if status == ChunkStatus::Completed {
                // A completed chunk counts in full even if the last progress
                // callback was coalesced away.
                state.transferred = state.size;
            }
        }
        guard.clone()
    };
    // Task-level transferred is the sum over chunks while chunking is active.
    let total = snapshot.iter().map(|c| c.transferred).sum::<u64>();
    let _ = events.send(ProgressEvent::Chunked {
        total,
        chunks: snapshot,
    });
}

/// Streaming SHA-256 of a local file, hex encoded
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| TransferError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| TransferError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
