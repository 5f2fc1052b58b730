//! Per-bucket FIFO of deferred requests.
//!
//! Mutated only by the owning bucket actor: appended when a dispatch
//! finds the quota exhausted, popped from the head during drain. No
//! reordering, no priorities, no cap (queue depth is logged on every
//! enqueue instead).

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::RestResult;
use crate::transport::{ApiRequest, ApiResponse};

/// A request waiting for quota, together with its caller's completion.
#[derive(Debug)]
pub struct PendingRequest {
    pub request: ApiRequest,
    pub respond_to: oneshot::Sender<RestResult<ApiResponse>>,
}

/// FIFO queue of deferred requests.
#[derive(Debug, Default)]
pub struct RequestQueue {
    items: VecDeque<PendingRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request at the tail.
    pub fn push(&mut self, pending: PendingRequest) {
        self.items.push_back(pending);
    }

    /// Removes and returns the head request, if any.
    pub fn pop(&mut self) -> Option<PendingRequest> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
