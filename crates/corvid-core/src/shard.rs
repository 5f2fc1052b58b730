//! Shard identity and lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Environment variable carrying the shard's id at spawn time.
pub const SHARD_ID_ENV: &str = "CORVID_SHARD_ID";
/// Environment variable carrying the total shard count at spawn time.
pub const SHARD_COUNT_ENV: &str = "CORVID_SHARD_COUNT";

/// Identifier of one shard, `0..count`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ShardId(pub u16);

impl ShardId {
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a shard, as reported by the worker itself.
///
/// The supervisor records these reports; it never infers state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardState {
    /// The worker's realtime connection is up and serving.
    Ready,
    /// The worker's realtime connection has closed.
    Closed,
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardState::Ready => f.write_str("ready"),
            ShardState::Closed => f.write_str("closed"),
        }
    }
}

/// A shard's identity: its id and the total shard count.
///
/// These two values are the only spawn parameters a worker receives; it
/// uses them to compute which partition of the workload it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardIdentity {
    pub id: ShardId,
    pub count: u16,
}

impl ShardIdentity {
    pub fn new(id: ShardId, count: u16) -> Self {
        Self { id, count }
    }

    /// Reads the identity from the spawn environment variables.
    ///
    /// # Errors
    ///
    /// `CoreError::InvalidShardEnv` if either variable is missing,
    /// non-numeric, or the id is out of range for the count.
    pub fn from_env() -> CoreResult<Self> {
        let id = read_env_u16(SHARD_ID_ENV)?;
        let count = read_env_u16(SHARD_COUNT_ENV)?;
        if count == 0 {
            return Err(CoreError::InvalidShardEnv {
                var: SHARD_COUNT_ENV,
                reason: "shard count must be at least 1".to_string(),
            });
        }
        if id >= count {
            return Err(CoreError::InvalidShardEnv {
                var: SHARD_ID_ENV,
                reason: format!("id {id} out of range for count {count}"),
            });
        }
        Ok(Self::new(ShardId(id), count))
    }
}

fn read_env_u16(var: &'static str) -> CoreResult<u16> {
    let raw = std::env::var(var).map_err(|_| CoreError::InvalidShardEnv {
        var,
        reason: "not set".to_string(),
    })?;
    raw.parse().map_err(|_| CoreError::InvalidShardEnv {
        var,
        reason: format!("not a number: {raw}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_id_display() {
        assert_eq!(format!("{}", ShardId(3)), "3");
    }

    #[test]
    fn test_shard_state_serde() {
        let json = serde_json::to_string(&ShardState::Ready).unwrap();
        assert_eq!(json, "\"ready\"");
        let back: ShardState = serde_json::from_str("\"closed\"").unwrap();
        assert_eq!(back, ShardState::Closed);
    }

    #[test]
    fn test_identity_from_env() {
        // Env vars are process-global; run the variants in one test to
        // avoid interference between parallel test threads.
        std::env::set_var(SHARD_ID_ENV, "2");
        std::env::set_var(SHARD_COUNT_ENV, "4");
        let identity = ShardIdentity::from_env().unwrap();
        assert_eq!(identity.id, ShardId(2));
        assert_eq!(identity.count, 4);

        std::env::set_var(SHARD_ID_ENV, "4");
        assert!(ShardIdentity::from_env().is_err());

        std::env::set_var(SHARD_ID_ENV, "zero");
        assert!(ShardIdentity::from_env().is_err());

        std::env::remove_var(SHARD_ID_ENV);
        std::env::remove_var(SHARD_COUNT_ENV);
    }
}
