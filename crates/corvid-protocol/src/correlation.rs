//! Correlation of async requests with their replies.
//!
//! Every request that expects a reply registers here before it is sent.
//! The table is an explicit arena from identifier to pending completion;
//! an entry is removed the moment its reply arrives, so sustained traffic
//! never accumulates listeners. Identifiers only need to be unique among
//! requests currently in flight on one channel, which a per-channel
//! atomic counter guarantees outright.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Opaque token pairing a request with its eventual reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pending-reply table for one message channel.
///
/// Shared between the task that sends requests and the task that pumps
/// incoming replies. Entries for a peer that dies before replying stay
/// registered and their receivers simply never resolve; callers needing
/// bounded latency race the receiver against an external timeout.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an identifier and registers a pending completion for it.
    ///
    /// The returned receiver resolves when [`resolve`](Self::resolve) is
    /// called with the same identifier.
    pub fn register(&self) -> (CorrelationId, oneshot::Receiver<Value>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);
        (CorrelationId(id), rx)
    }

    /// Completes the pending request for `id` with `payload`.
    ///
    /// The entry is removed whether or not the receiver is still alive.
    /// Returns false if no request with this identifier is in flight,
    /// which callers log and otherwise ignore.
    pub fn resolve(&self, id: CorrelationId, payload: Value) -> bool {
        let Some(tx) = self.lock_pending().remove(&id.0) else {
            debug!(correlation = %id, "Reply for unknown correlation id");
            return false;
        };
        // A dropped receiver means the caller abandoned the request
        // (e.g. an external timeout fired); the payload is discarded.
        let _ = tx.send(payload);
        true
    }

    /// Number of requests currently awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        // A poisoned lock only means a peer task panicked mid-insert;
        // the map itself is still usable.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
