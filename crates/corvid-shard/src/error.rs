//! Shard coordination error types.

use thiserror::Error;

use corvid_core::ShardId;
use corvid_protocol::ProtocolError;

/// Errors that can occur in shard supervision and coordination.
#[derive(Error, Debug)]
pub enum ShardError {
    /// The peer's message channel has shut down
    #[error("Shard channel closed")]
    ChannelClosed,

    /// Worker process could not be spawned or wired up
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// A targeted operation named a shard that does not exist
    #[error("No such shard: {0}")]
    NoSuchShard(ShardId),

    /// A frame could not be encoded or decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A reply arrived but was not the expected shape
    #[error("Unexpected reply shape: {0}")]
    BadReply(String),
}

/// Result type for shard operations.
pub type ShardResult<T> = Result<T, ShardError>;
