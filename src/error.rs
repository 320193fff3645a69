// Transfer Engine Error Types

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Error taxonomy for the transfer engine
#[derive(Error, Debug)]
pub enum TransferError {
    // Session errors
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Session pool exhausted for {host} after {waited_ms} ms")]
    PoolExhausted { host: String, waited_ms: u64 },

    #[error("Session disconnected: {reason}")]
    Disconnected { reason: String },

    // Transfer errors
    #[error("Transfer aborted")]
    Aborted,

    #[error("Integrity check failed for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Remote {op} failed for {path}: {reason}")]
    Remote {
        op: &'static str,
        path: String,
        reason: String,
    },

    // Task errors
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // Host resolution errors
    #[error("Unknown host: {host_id}")]
    UnknownHost { host_id: String },

    #[error("No credentials for host: {host_id}")]
    MissingCredentials { host_id: String },

    // Local I/O errors
    #[error("File I/O error: {path}")]
    Io { path: PathBuf, source: io::Error },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransferError {
    /// Check if a failed operation is eligible for the queue's retry policy.
    ///
    /// The retry decision itself is made only by the transfer queue; this
    /// classifier never triggers a retry on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Connection { .. }
                | TransferError::PoolExhausted { .. }
                | TransferError::Disconnected { .. }
                | TransferError::Integrity { .. }
                | TransferError::Remote { .. }
                | TransferError::Io { .. }
        )
    }

    /// Check if the error indicates a broken underlying session that must
    /// be discarded from the pool instead of returned to idle.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            TransferError::Disconnected { .. } | TransferError::Connection { .. }
        )
    }
}
