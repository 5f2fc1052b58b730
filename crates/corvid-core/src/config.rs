//! Sharding configuration.
//!
//! Loaded from TOML, with defaults matching the platform's recommended
//! spawn pacing. The worker program defaults to the current executable,
//! which is the common deployment shape (one binary, supervisor and
//! worker roles selected by the shard environment variables).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Platform-recommended delay between shard spawns, in milliseconds.
///
/// The remote gateway rate-limits new-connection handshakes per time
/// window; spawning faster than this violates it.
pub const DEFAULT_STAGGER_MS: u64 = 5500;

/// Configuration for the shard supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    /// Number of worker processes to spawn.
    pub shard_count: u16,

    /// Delay between consecutive spawns, in milliseconds.
    pub stagger_ms: u64,

    /// Program to spawn for each worker.
    pub worker_program: PathBuf,

    /// Extra arguments passed to each worker.
    pub worker_args: Vec<String>,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            stagger_ms: DEFAULT_STAGGER_MS,
            worker_program: std::env::current_exe().unwrap_or_default(),
            worker_args: Vec::new(),
        }
    }
}

impl ShardingConfig {
    /// Loads and validates a config from a TOML file.
    ///
    /// # Errors
    ///
    /// - `CoreError::Io` if the file cannot be read
    /// - `CoreError::Toml` if it is not valid TOML
    /// - `CoreError::InvalidConfig` if validation fails
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        debug!(path = %path.display(), shards = config.shard_count, "Loaded sharding config");
        Ok(config)
    }

    /// Validates field constraints.
    pub fn validate(&self) -> CoreResult<()> {
        if self.shard_count == 0 {
            return Err(CoreError::InvalidConfig(
                "shard_count must be at least 1".to_string(),
            ));
        }
        if self.worker_program.as_os_str().is_empty() {
            return Err(CoreError::InvalidConfig(
                "worker_program must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// The spawn stagger as a `Duration`.
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}
