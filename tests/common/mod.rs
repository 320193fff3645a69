// In-memory remote side shared by the integration tests: a mock filesystem
// plus a connector/session pair implementing the engine's remote traits.

#![allow(dead_code)]

use async_trait::async_trait;
use hakobu::{
    AuthMethod, ByteRange, ConnectParams, HostIdentity, HostInfo, RemoteConnector, RemoteEntry,
    RemoteMetadata, RemoteSession, TransferError,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MockFile {
    pub data: Vec<u8>,
    pub mtime_ms: u64,
    pub is_dir: bool,
    pub mode: Option<u32>,
}

impl MockFile {
    pub fn file(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            mtime_ms: 1_700_000_000_000,
            is_dir: false,
            mode: Some(0o644),
        }
    }

    pub fn dir() -> Self {
        Self {
            data: Vec::new(),
            mtime_ms: 1_700_000_000_000,
            is_dir: true,
            mode: Some(0o755),
        }
    }
}

/// The remote host's filesystem, shared by every session of a connector
#[derive(Default)]
pub struct MockRemoteFs {
    pub files: Mutex<HashMap<String, MockFile>>,
}

impl MockRemoteFs {
    pub fn insert(&self, path: &str, file: MockFile) {
        self.files.lock().unwrap().insert(path.to_string(), file);
    }

    pub fn get(&self, path: &str) -> Option<MockFile> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }
}

/// Failure and pacing knobs for the mock
#[derive(Default)]
pub struct MockBehavior {
    /// Fail the next N connect attempts
    pub fail_connects: AtomicUsize,
    /// Fail the next N download/upload operations
    pub fail_transfers: AtomicUsize,
    /// Pause between progress steps, to give tests a window to pause/cancel
    pub step_delay_ms: AtomicUsize,
    /// Bytes reported per progress step
    pub step_bytes: AtomicUsize,
    /// Serve a corrupted checksum, to exercise integrity failures
    pub corrupt_checksum: AtomicUsize,
}

pub struct MockConnector {
    pub fs: Arc<MockRemoteFs>,
    pub behavior: Arc<MockBehavior>,
    pub connects: AtomicUsize,
    pub live_sessions: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        let behavior = MockBehavior::default();
        behavior.step_bytes.store(1024, Ordering::SeqCst);
        Self {
            fs: Arc::new(MockRemoteFs::default()),
            behavior: Arc::new(behavior),
            connects: AtomicUsize::new(0),
            live_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl RemoteConnector for MockConnector {
    async fn connect(
        &self,
        identity: &HostIdentity,
        _auth: &AuthMethod,
        _params: &ConnectParams,
    ) -> hakobu::Result<Arc<dyn RemoteSession>> {
        if decrement_if_positive(&self.behavior.fail_connects) {
            return Err(TransferError::Connection {
                host: identity.label(),
                reason: "mock connect refused".into(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.live_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            fs: Arc::clone(&self.fs),
            behavior: Arc::clone(&self.behavior),
            live_sessions: Arc::clone(&self.live_sessions),
        }))
    }
}

pub struct MockSession {
    fs: Arc<MockRemoteFs>,
    behavior: Arc<MockBehavior>,
    live_sessions: Arc<AtomicUsize>,
}

fn decrement_if_positive(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MockSession {
    fn step_delay(&self) -> Duration {
        Duration::from_millis(self.behavior.step_delay_ms.load(Ordering::SeqCst) as u64)
    }

    fn step_bytes(&self) -> usize {
        self.behavior.step_bytes.load(Ordering::SeqCst).max(1)
    }

    fn fail_if_requested(&self, op: &'static str, path: &str) -> hakobu::Result<()> {
        if decrement_if_positive(&self.behavior.fail_transfers) {
            return Err(TransferError::Remote {
                op,
                path: path.to_string(),
                reason: "mock transfer failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn stat(&self, path: &str) -> hakobu::Result<RemoteMetadata> {
        let file = self.fs.get(path).ok_or_else(|| TransferError::Remote {
            op: "stat",
            path: path.to_string(),
            reason: "no such file".into(),
        })?;
        Ok(RemoteMetadata {
            size: file.data.len() as u64,
            mtime_ms: file.mtime_ms,
            is_dir: file.is_dir,
            permissions: file.mode,
        })
    }

    async fn list(&self, path: &str) -> hakobu::Result<Vec<RemoteEntry>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let files = self.fs.files.lock().unwrap();
        let mut entries = Vec::new();
        for (full, file) in files.iter() {
            if let Some(rest) = full.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    entries.push(RemoteEntry {
                        name: rest.to_string(),
                        metadata: RemoteMetadata {
                            size: file.data.len() as u64,
                            mtime_ms: file.mtime_ms,
                            is_dir: file.is_dir,
                            permissions: file.mode,
                        },
                    });
                }
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        range: ByteRange,
        progress: hakobu::remote::ProgressFn,
        cancel: CancellationToken,
    ) -> hakobu::Result<u64> {
        self.fail_if_requested("get", remote_path)?;
        let data = self
            .fs
            .get(remote_path)
            .ok_or_else(|| TransferError::Remote {
                op: "get",
                path: remote_path.to_string(),
                reason: "no such file".into(),
            })?
            .data;

        let start = range.offset.min(data.len() as u64) as usize;
        let end = match range.length {
            Some(len) => (start + len as usize).min(data.len()),
            None => data.len(),
        };
        let slice = &data[start..end];

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(local_path)
            .await
            .map_err(|e| TransferError::Io {
                path: local_path.to_path_buf(),
                source: e,
            })?;
        file.seek(std::io::SeekFrom::Start(range.offset))
            .await
            .map_err(|e| TransferError::Io {
                path: local_path.to_path_buf(),
                source: e,
            })?;

        let mut moved = 0usize;
        for step in slice.chunks(self.step_bytes()) {
            if cancel.is_cancelled() {
                return Err(TransferError::Aborted);
            }
            let delay = self.step_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            file.write_all(step).await.map_err(|e| TransferError::Io {
                path: local_path.to_path_buf(),
                source: e,
            })?;
            moved += step.len();
            progress(moved as u64);
        }
        file.flush().await.map_err(|e| TransferError::Io {
            path: local_path.to_path_buf(),
            source: e,
        })?;
        Ok(moved as u64)
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        range: ByteRange,
        progress: hakobu::remote::ProgressFn,
        cancel: CancellationToken,
    ) -> hakobu::Result<u64> {
        self.fail_if_requested("put", remote_path)?;
        let mut file =
            tokio::fs::File::open(local_path)
                .await
                .map_err(|e| TransferError::Io {
                    path: local_path.to_path_buf(),
                    source: e,
                })?;
        file.seek(std::io::SeekFrom::Start(range.offset))
            .await
            .map_err(|e| TransferError::Io {
                path: local_path.to_path_buf(),
                source: e,
            })?;
        let mut data = Vec::new();
        match range.length {
            Some(len) => {
                let mut handle = file.take(len);
                handle
                    .read_to_end(&mut data)
                    .await
                    .map_err(|e| TransferError::Io {
                        path: local_path.to_path_buf(),
                        source: e,
                    })?;
            }
            None => {
                file.read_to_end(&mut data)
                    .await
                    .map_err(|e| TransferError::Io {
                        path: local_path.to_path_buf(),
                        source: e,
                    })?;
            }
        }

        let mut moved = 0usize;
        for step in data.chunks(self.step_bytes()) {
            if cancel.is_cancelled() {
                return Err(TransferError::Aborted);
            }
            let delay = self.step_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            moved += step.len();
            progress(moved as u64);
            // Commit incrementally so cancellation leaves a partial artifact
            let mut files = self.fs.files.lock().unwrap();
            let entry = files
                .entry(remote_path.to_string())
                .or_insert_with(|| MockFile::file(Vec::new()));
            let write_end = range.offset as usize + moved;
            if entry.data.len() < write_end {
                entry.data.resize(write_end, 0);
            }
            entry.data[range.offset as usize..write_end].copy_from_slice(&data[..moved]);
        }
        if data.is_empty() {
            self.fs.insert(remote_path, MockFile::file(Vec::new()));
        }
        Ok(moved as u64)
    }

    async fn delete(&self, path: &str) -> hakobu::Result<()> {
        let removed = self.fs.files.lock().unwrap().remove(path);
        if removed.is_none() {
            return Err(TransferError::Remote {
                op: "delete",
                path: path.to_string(),
                reason: "no such file".into(),
            });
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> hakobu::Result<()> {
        let mut files = self.fs.files.lock().unwrap();
        match files.remove(from) {
            Some(file) => {
                files.insert(to.to_string(), file);
                Ok(())
            }
            None => Err(TransferError::Remote {
                op: "rename",
                path: from.to_string(),
                reason: "no such file".into(),
            }),
        }
    }

    async fn mkdir(&self, path: &str) -> hakobu::Result<()> {
        self.fs.insert(path, MockFile::dir());
        Ok(())
    }

    async fn checksum(&self, path: &str) -> hakobu::Result<Option<String>> {
        if decrement_if_positive(&self.behavior.corrupt_checksum) {
            return Ok(Some("0".repeat(64)));
        }
        Ok(self.fs.get(path).map(|f| {
            let mut hasher = Sha256::new();
            hasher.update(&f.data);
            hex::encode(hasher.finalize())
        }))
    }

    async fn set_permissions(&self, path: &str, mode: u32) -> hakobu::Result<()> {
        let mut files = self.fs.files.lock().unwrap();
        if let Some(file) = files.get_mut(path) {
            file.mode = Some(mode);
        }
        Ok(())
    }

    async fn close(&self) -> hakobu::Result<()> {
        self.live_sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Single-host registry/credential setup around a mock connector
pub fn single_host(host_id: &str) -> (hakobu::remote::InMemoryHostRegistry, hakobu::remote::InMemoryCredentialStore)
{
    let mut registry = hakobu::remote::InMemoryHostRegistry::new();
    registry.insert(
        host_id,
        HostInfo {
            address: "files.example.com".into(),
            port: 22,
            username: "deploy".into(),
            default_remote_path: None,
        },
    );
    let mut credentials = hakobu::remote::InMemoryCredentialStore::new();
    credentials.insert(
        host_id,
        AuthMethod::Password {
            password: "secret".into(),
        },
    );
    (registry, credentials)
}

pub fn identity() -> HostIdentity {
    HostIdentity::new("files.example.com", 22, "deploy")
}

pub fn auth() -> AuthMethod {
    AuthMethod::Password {
        password: "secret".into(),
    }
}
