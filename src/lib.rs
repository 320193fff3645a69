// Hakobu
//
// A transfer engine for moving files to and from remote hosts over an
// authenticated remote-session protocol: pooled sessions, a priority
// queue with retry and backoff, chunked parallel transfers for large
// files, and delta-diff directory synchronization.
//
// The remote protocol itself is a capability injected through the
// `remote` traits; this crate only orchestrates it.

pub mod config;
pub mod error;
pub mod remote;
pub mod sync;
pub mod transfer;

pub use config::{ChunkConfig, EngineConfig, PoolConfig, QueueConfig, RetryPolicy};
pub use error::{Result, TransferError};
pub use remote::{
    AuthMethod, ByteRange, ConnectParams, CredentialStore, HostIdentity, HostInfo, HostRegistry,
    PoolKey, RemoteConnector, RemoteEntry, RemoteMetadata, RemoteSession, SessionLease,
    SessionPool,
};
pub use sync::{DeltaDiffEngine, DiffOptions, DiffPlan};
pub use transfer::{
    ProgressSink, ProgressUpdate, QueueEvent, QueueObserver, TaskPriority, TaskStatus,
    TransferDirection, TransferQueue, TransferRecord, TransferTask,
};
