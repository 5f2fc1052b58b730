//! Bucket actor - owns the quota state for one route key.
//!
//! One actor task per distinct bucket key, living for the process
//! lifetime. The actor is the single owner of the bucket's quota state
//! and its FIFO queue; everything else talks to it through commands.
//!
//! State cycle per key: unknown quota (one optimistic slot, so the first
//! request goes out alone as a probe) -> known -> exhausted -> refilled.
//! Unknown is only revisited if the server stops sending quota headers.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures are logged or ignored, never panic

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use corvid_core::{Quota, RateLimitHeaders};

use crate::error::{RestError, RestResult};
use crate::queue::{PendingRequest, RequestQueue};
use crate::router::RestEvent;
use crate::transport::{ApiRequest, ApiResponse, Transport};

/// Command channel depth per bucket.
const BUCKET_CHANNEL_CAPACITY: usize = 64;

/// Commands processed by a bucket actor.
#[derive(Debug)]
pub(crate) enum BucketCommand {
    /// Admit a request: send now if quota allows, otherwise enqueue.
    Dispatch {
        request: ApiRequest,
        respond_to: oneshot::Sender<RestResult<ApiResponse>>,
    },

    /// A response arrived; overwrite quota state from its headers.
    Complete { headers: RateLimitHeaders },

    /// The refill timer fired: restore capacity and drain the queue.
    Refill,
}

/// Cheap-to-clone handle for submitting requests to one bucket.
#[derive(Debug, Clone)]
pub struct BucketHandle {
    sender: mpsc::Sender<BucketCommand>,
}

impl BucketHandle {
    /// Routes one request through the bucket.
    ///
    /// Resolves when the request has been sent and answered, however
    /// long it spends queued behind exhausted quota.
    ///
    /// # Errors
    ///
    /// See [`RestError`]; `ChannelClosed` if the actor has shut down.
    pub async fn send(&self, request: ApiRequest) -> RestResult<ApiResponse> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(BucketCommand::Dispatch {
                request,
                respond_to: tx,
            })
            .await
            .map_err(|_| RestError::ChannelClosed)?;
        rx.await.map_err(|_| RestError::ChannelClosed)?
    }
}

/// Spawns the actor task for one bucket key and returns its handle.
pub(crate) fn spawn_bucket(
    key: String,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<RestEvent>,
) -> BucketHandle {
    let (sender, receiver) = mpsc::channel(BUCKET_CHANNEL_CAPACITY);
    let actor = BucketActor {
        key,
        receiver,
        self_sender: sender.clone(),
        transport,
        events,
        quota: Quota::Unknown,
        limit: None,
        timer_armed: false,
        queue: RequestQueue::new(),
    };
    tokio::spawn(actor.run());
    BucketHandle { sender }
}

/// The bucket actor - single owner of one key's quota state.
struct BucketActor {
    /// Bucket key, for logging only.
    key: String,

    /// Command receiver.
    receiver: mpsc::Receiver<BucketCommand>,

    /// Own sender, handed to transport tasks and the refill timer so
    /// completions and refills flow back through the command channel.
    self_sender: mpsc::Sender<BucketCommand>,

    /// The wire transport.
    transport: Arc<dyn Transport>,

    /// Client-wide event publisher (authentication failures).
    events: broadcast::Sender<RestEvent>,

    /// Remaining quota. The server is authoritative; this is only ever
    /// trusted after the first response for this key.
    quota: Quota,

    /// Last server-reported window limit; refill target.
    limit: Option<u32>,

    /// True while a refill timer is in flight. At most one per bucket;
    /// re-arming while armed is a no-op.
    timer_armed: bool,

    /// Deferred requests, drained strictly FIFO on refill.
    queue: RequestQueue,
}

impl BucketActor {
    /// Runs the actor loop until every handle (and pending timer or
    /// transport task) has dropped its sender.
    async fn run(mut self) {
        debug!(bucket = %self.key, "Bucket created");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                BucketCommand::Dispatch {
                    request,
                    respond_to,
                } => self.handle_dispatch(request, respond_to),
                BucketCommand::Complete { headers } => self.handle_complete(headers),
                BucketCommand::Refill => self.handle_refill(),
            }
        }

        debug!(bucket = %self.key, queued = self.queue.len(), "Bucket actor stopped");
    }

    /// Admission decision: send now or enqueue.
    fn handle_dispatch(
        &mut self,
        request: ApiRequest,
        respond_to: oneshot::Sender<RestResult<ApiResponse>>,
    ) {
        if !self.quota.has_capacity() {
            self.queue.push(PendingRequest {
                request,
                respond_to,
            });
            debug!(
                bucket = %self.key,
                depth = self.queue.len(),
                "Quota exhausted, request queued"
            );
            return;
        }
        self.dispatch_now(request, respond_to);
    }

    /// Sends one request on the transport.
    ///
    /// The optimistic decrement happens here, before the call completes,
    /// so concurrent callers issued before any response returns are
    /// throttled correctly. On a fresh bucket this spends the single
    /// probe slot: a cold burst sends one request and queues the rest
    /// until the probe's response reports real counts.
    fn dispatch_now(
        &mut self,
        request: ApiRequest,
        respond_to: oneshot::Sender<RestResult<ApiResponse>>,
    ) {
        self.quota.decrement();

        let transport = Arc::clone(&self.transport);
        let feedback = self.self_sender.clone();
        let events = self.events.clone();
        let key = self.key.clone();

        tokio::spawn(async move {
            match transport.send(&request).await {
                Ok(response) => {
                    let headers = RateLimitHeaders::parse(&response.headers);
                    // Feed quota back before resolving the caller, so a
                    // follow-up request issued from the continuation sees
                    // the updated state.
                    if feedback
                        .send(BucketCommand::Complete { headers })
                        .await
                        .is_err()
                    {
                        debug!(bucket = %key, "Bucket gone before completion");
                    }
                    let _ = respond_to.send(classify(response, &events));
                }
                Err(err) => {
                    // No evidence the request consumed or freed quota:
                    // bucket state is left untouched.
                    warn!(bucket = %key, error = %err, "Transport failure");
                    let _ = respond_to.send(Err(RestError::Transport(err)));
                }
            }
        });
    }

    /// Overwrites quota state from response headers; the server is
    /// authoritative. Arms the refill timer if reset timing is present
    /// and none is already in flight.
    fn handle_complete(&mut self, headers: RateLimitHeaders) {
        self.quota = match headers.remaining {
            Some(n) => Quota::Known(n),
            // Defensive fallback: headers absent, back to unknown.
            None => Quota::Unknown,
        };
        self.limit = headers.limit;

        // A response can free capacity directly (a probe's headers admit
        // the burst queued behind it), so drain before the timer check.
        self.drain_queue();

        if self.timer_armed {
            return;
        }
        let Some(delay) = headers.retry_delay() else {
            // No reset timing: nothing to arm. Queued items stay queued
            // until a future response supplies it.
            if !self.queue.is_empty() {
                warn!(
                    bucket = %self.key,
                    depth = self.queue.len(),
                    "Queue stalled: response carried no reset timing"
                );
            }
            return;
        };

        self.timer_armed = true;
        debug!(bucket = %self.key, delay_ms = delay.as_millis() as u64, "Refill timer armed");

        let sender = self.self_sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(BucketCommand::Refill).await;
        });
    }

    /// Restores capacity and drains the queue.
    fn handle_refill(&mut self) {
        self.timer_armed = false;
        self.quota = match self.limit {
            Some(limit) => Quota::Known(limit),
            None => Quota::Unknown,
        };
        debug!(
            bucket = %self.key,
            queued = self.queue.len(),
            "Refill: capacity restored"
        );
        self.drain_queue();
    }

    /// Drains queued requests while capacity lasts.
    ///
    /// Explicit loop with the capacity check at loop top: dispatching a
    /// drained item decrements quota again, so the drain stops the
    /// instant capacity is exhausted and leaves the rest for the next
    /// refill.
    fn drain_queue(&mut self) {
        loop {
            if !self.quota.has_capacity() {
                break;
            }
            let Some(pending) = self.queue.pop() else {
                break;
            };
            self.dispatch_now(pending.request, pending.respond_to);
        }
    }
}

/// Maps terminal server statuses to failures; all other responses are
/// returned to the caller as-is for the domain layer to interpret.
fn classify(
    response: ApiResponse,
    events: &broadcast::Sender<RestEvent>,
) -> RestResult<ApiResponse> {
    match response.status {
        401 => {
            // The surrounding connection layer is expected to disconnect
            // on this; it learns about it through the event channel.
            let _ = events.send(RestEvent::AuthenticationFailed);
            Err(RestError::Unauthorized)
        }
        403 => Err(RestError::Forbidden),
        429 => Err(RestError::QuotaDesync),
        _ => Ok(response),
    }
}
