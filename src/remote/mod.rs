// Remote Session Layer
//
// Abstract capability over an authenticated remote-session protocol. The
// engine orchestrates calls against these traits; it never implements the
// wire protocol itself.

pub mod identity;
pub mod pool;
pub mod registry;

pub use identity::{AuthMethod, HostId, HostIdentity, PoolKey};
pub use pool::{PoolEvent, PoolEventKind, PoolStats, SessionLease, SessionPool};
pub use registry::{
    CredentialStore, HostInfo, HostRegistry, InMemoryCredentialStore, InMemoryHostRegistry,
};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cumulative bytes moved by the current operation, reported at the
/// implementation's natural boundaries (each buffer written).
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// Byte range for a partial transfer. `length: None` means "to the end".
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn whole() -> Self {
        Self::default()
    }

    pub fn from_offset(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    pub fn slice(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }
}

/// Metadata for a remote path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteMetadata {
    pub size: u64,
    pub mtime_ms: u64,
    pub is_dir: bool,
    pub permissions: Option<u32>,
}

/// One entry of a remote directory listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub metadata: RemoteMetadata,
}

/// Extra parameters for establishing a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectParams {
    pub timeout_secs: Option<u64>,
    pub keepalive_secs: Option<u64>,
}

/// An authenticated session against one remote host.
///
/// Provided by a remote-session/transport library; implementations must
/// observe the cancellation token at natural boundaries of `download` and
/// `upload` and return [`crate::TransferError::Aborted`] when it fires.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn stat(&self, path: &str) -> Result<RemoteMetadata>;

    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>>;

    /// Copy a remote byte range into the local file at the same offset.
    /// Returns the number of bytes moved.
    async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        range: ByteRange,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<u64>;

    /// Copy a local byte range to the remote file at the same offset.
    /// Returns the number of bytes moved.
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        range: ByteRange,
        progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Result<u64>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Hex-encoded SHA-256 of a remote file, if the remote side can
    /// compute one. `None` disables integrity verification for the path.
    async fn checksum(&self, path: &str) -> Result<Option<String>>;

    async fn set_permissions(&self, path: &str, mode: u32) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Session factory injected into the pool
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Establish and authenticate a new session. Failures propagate to the
    /// caller; the pool never retries a connect.
    async fn connect(
        &self,
        identity: &HostIdentity,
        auth: &AuthMethod,
        params: &ConnectParams,
    ) -> Result<Arc<dyn RemoteSession>>;
}
