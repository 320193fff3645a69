// Engine Configuration

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_max_connections() -> usize {
    5
}
fn default_idle_timeout_secs() -> u64 {
    300
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_acquire_timeout_secs() -> u64 {
    30
}
fn default_max_concurrent() -> usize {
    3
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_chunk_threshold() -> u64 {
    100 * 1024 * 1024
}
fn default_chunk_size() -> u64 {
    10 * 1024 * 1024
}
fn default_chunk_concurrency() -> usize {
    4
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub chunked: ChunkConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| TransferError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| TransferError::InvalidConfig {
                reason: format!("failed to parse {}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration bounds
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_connections == 0 {
            return Err(TransferError::InvalidConfig {
                reason: "pool.max_connections must be at least 1".into(),
            });
        }
        if self.chunked.chunk_size == 0 {
            return Err(TransferError::InvalidConfig {
                reason: "chunked.chunk_size must be nonzero".into(),
            });
        }
        if self.chunked.max_concurrent == 0 {
            return Err(TransferError::InvalidConfig {
                reason: "chunked.max_concurrent must be at least 1".into(),
            });
        }
        if self.queue.retry.backoff_multiplier < 1.0 {
            return Err(TransferError::InvalidConfig {
                reason: "retry.backoff_multiplier must be >= 1.0".into(),
            });
        }
        Ok(())
    }
}

/// Session pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum live sessions per host identity
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle entries older than this are evicted by the sweeper
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How long an acquire waits for a slot before failing
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Transfer queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum tasks running at once (floor 1)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given retry attempt (1-based).
    ///
    /// Attempt `n` waits `retry_delay_ms * backoff_multiplier^(n-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.backoff_multiplier.powi(exponent as i32);
        Duration::from_millis((self.retry_delay_ms as f64 * factor) as u64)
    }
}

/// Chunked parallel transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Whether parallel chunked transfers are enabled at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Files larger than this are split into chunks
    #[serde(default = "default_chunk_threshold")]
    pub threshold: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Maximum chunks in flight at once
    #[serde(default = "default_chunk_concurrency")]
    pub max_concurrent: usize,
    /// Compare source and destination checksums after the transfer
    #[serde(default)]
    pub verify_checksum: bool,
    /// Attempt to carry permissions over after the transfer
    #[serde(default = "default_true")]
    pub preserve_attributes: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_chunk_threshold(),
            chunk_size: default_chunk_size(),
            max_concurrent: default_chunk_concurrency(),
            verify_checksum: false,
            preserve_attributes: true,
        }
    }
}
