//! Request router - the entry point callers use.
//!
//! Maps a logical route to its bucket key, lazily creating the bucket
//! actor for unseen keys, and delegates the request to it. Buckets are
//! created at most once per key and live for the process lifetime.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use corvid_core::Route;

use crate::bucket::{spawn_bucket, BucketHandle};
use crate::error::RestResult;
use crate::transport::{ApiRequest, ApiResponse, AttachedFile, Transport};

/// Capacity of the client-wide event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Events published by the REST client for the surrounding layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestEvent {
    /// The server rejected the client's credentials (401). The
    /// connection layer is expected to disconnect in response.
    AuthenticationFailed,
}

/// The REST client: a router from logical calls to quota buckets.
pub struct RestClient {
    transport: Arc<dyn Transport>,

    /// Bucket handles by key. Creation is idempotent: the map entry is
    /// inserted under the lock, so two racing calls for a fresh key
    /// still produce exactly one actor. Never awaits while held.
    buckets: Mutex<HashMap<String, BucketHandle>>,

    /// Publisher for client-wide events.
    events: broadcast::Sender<RestEvent>,
}

impl RestClient {
    /// Creates a client over the given transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            buckets: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribes to client-wide events.
    pub fn events(&self) -> broadcast::Receiver<RestEvent> {
        self.events.subscribe()
    }

    /// Sends a request with a JSON body and no attachments.
    pub async fn request(&self, route: Route, body: Option<Value>) -> RestResult<ApiResponse> {
        self.request_with_files(route, body, Vec::new()).await
    }

    /// Sends a request, routing it through the bucket for its key.
    ///
    /// Never blocks on quota here: if the bucket is exhausted the
    /// request queues inside it and this future resolves once it has
    /// eventually been sent and answered.
    pub async fn request_with_files(
        &self,
        route: Route,
        body: Option<Value>,
        files: Vec<AttachedFile>,
    ) -> RestResult<ApiResponse> {
        let endpoint = route.endpoint()?;
        let request = ApiRequest {
            endpoint,
            method: route.method(),
            body,
            files,
        };
        let bucket = self.bucket_for(route.bucket_key());
        bucket.send(request).await
    }

    /// Looks up or lazily creates the bucket for a key.
    fn bucket_for(&self, key: String) -> BucketHandle {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = buckets.get(&key) {
            return handle.clone();
        }
        debug!(bucket = %key, "Creating bucket");
        let handle = spawn_bucket(key.clone(), Arc::clone(&self.transport), self.events.clone());
        buckets.insert(key, handle.clone());
        handle
    }

    /// Number of buckets created so far.
    pub fn bucket_count(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
