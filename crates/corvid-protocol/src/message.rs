//! Protocol message types for supervisor/worker communication.
//!
//! Both directions use the same envelope shape: an action tag, a payload,
//! and - for request/response pairs - a correlation identifier. Replies
//! always carry the identifier the requester supplied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use corvid_core::{ShardId, ShardState};

use crate::correlation::CorrelationId;

/// Messages sent from the supervisor to a worker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SupervisorMessage {
    /// Invoke the worker's registered handler for `event` and reply with
    /// its value, correlated by `id`.
    CommunicationRequest {
        id: CorrelationId,
        event: String,
    },

    /// Answer to a worker-initiated `Broadcast` or `SendTo`, tagged with
    /// the worker's original identifier.
    CommunicationReply {
        id: CorrelationId,
        payload: Value,
    },

    /// Re-emit `event` with `args` on the worker's local event bus.
    /// Fire-and-forget; no reply expected.
    EmitEvent {
        event: String,
        #[serde(default)]
        args: Vec<Value>,
    },

    /// Close the worker's realtime connection with the given close code.
    /// Fire-and-forget; no reply expected.
    Disconnect {
        code: u16,
    },
}

/// Messages sent from a worker process to the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Answer to a supervisor `CommunicationRequest`.
    CommunicationReply {
        id: CorrelationId,
        payload: Value,
    },

    /// Ask the supervisor to query every shard for `event` and answer
    /// once with all results in shard-id order, tagged with `id`.
    Broadcast {
        id: CorrelationId,
        event: String,
    },

    /// Like `Broadcast`, but targeted at exactly one shard.
    SendTo {
        id: CorrelationId,
        event: String,
        shard: ShardId,
    },

    /// This worker's lifecycle state changed.
    StateChanged {
        state: ShardState,
    },

    /// Ask the supervisor to disconnect every shard, including the
    /// requester, with the given close code.
    DisconnectAll {
        code: u16,
    },
}

impl SupervisorMessage {
    /// Creates a communication request.
    pub fn communication_request(id: CorrelationId, event: impl Into<String>) -> Self {
        Self::CommunicationRequest {
            id,
            event: event.into(),
        }
    }

    /// Creates a reply to a worker's broadcast or targeted send.
    pub fn communication_reply(id: CorrelationId, payload: Value) -> Self {
        Self::CommunicationReply { id, payload }
    }

    /// Creates a fire-and-forget event emission.
    pub fn emit_event(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self::EmitEvent {
            event: event.into(),
            args,
        }
    }

    /// Creates a disconnect command.
    pub fn disconnect(code: u16) -> Self {
        Self::Disconnect { code }
    }
}

impl WorkerMessage {
    /// Creates a reply to a supervisor communication request.
    pub fn communication_reply(id: CorrelationId, payload: Value) -> Self {
        Self::CommunicationReply { id, payload }
    }

    /// Creates a broadcast query.
    pub fn broadcast(id: CorrelationId, event: impl Into<String>) -> Self {
        Self::Broadcast {
            id,
            event: event.into(),
        }
    }

    /// Creates a targeted query.
    pub fn send_to(id: CorrelationId, event: impl Into<String>, shard: ShardId) -> Self {
        Self::SendTo {
            id,
            event: event.into(),
            shard,
        }
    }

    /// Creates a lifecycle state report.
    pub fn state_changed(state: ShardState) -> Self {
        Self::StateChanged { state }
    }

    /// Creates a disconnect-all command.
    pub fn disconnect_all(code: u16) -> Self {
        Self::DisconnectAll { code }
    }
}
