//! Integration tests for the REST admission-control core.
//!
//! These drive a real `RestClient` over a scripted mock transport, with
//! tokio's paused clock so refill timers fire deterministically.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - the panic-free policy
//! applies to production code only.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{timeout, Instant};

use corvid_core::Route;
use corvid_rest::{
    ApiRequest, ApiResponse, RestClient, RestError, RestEvent, Transport, TransportError,
};

// ============================================================================
// Test Helpers
// ============================================================================

enum Scripted {
    Respond(ApiResponse),
    Fail(String),
}

/// Transport double: records every request in arrival order and answers
/// from a script, falling back to a plain 200 with no quota headers.
struct MockTransport {
    calls: Mutex<Vec<ApiRequest>>,
    script: Mutex<VecDeque<Scripted>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
        })
    }

    fn push_response(&self, response: ApiResponse) {
        self.script.lock().unwrap().push_back(Scripted::Respond(response));
    }

    fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(message.to_string()));
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn endpoints(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.endpoint.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.calls.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(TransportError::Connection(message)),
            None => Ok(plain_response(200)),
        }
    }
}

fn plain_response(status: u16) -> ApiResponse {
    ApiResponse {
        status,
        headers: HashMap::new(),
        body: None,
    }
}

/// A 200 response carrying the four quota headers (relative reset only,
/// so the paused clock fully controls timing).
fn quota_response(remaining: u32, limit: u32, reset_after: f64) -> ApiResponse {
    let mut headers = HashMap::new();
    headers.insert("x-ratelimit-remaining".to_string(), remaining.to_string());
    headers.insert("x-ratelimit-limit".to_string(), limit.to_string());
    headers.insert(
        "x-ratelimit-reset-after".to_string(),
        reset_after.to_string(),
    );
    ApiResponse {
        status: 200,
        headers,
        body: None,
    }
}

/// Spawns a request task and yields until its dispatch has reached the
/// bucket, so successive calls enqueue in a deterministic order.
async fn spawn_request(
    client: &Arc<RestClient>,
    route: Route,
) -> tokio::task::JoinHandle<Result<ApiResponse, RestError>> {
    let client = Arc::clone(client);
    let handle = tokio::spawn(async move { client.request(route, None).await });
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    handle
}

// ============================================================================
// Admission & Quota Tracking
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_call_on_fresh_bucket_sends_immediately() {
    let mock = MockTransport::new();
    let client = RestClient::new(mock.clone());

    let start = Instant::now();
    let response = client
        .request(Route::create_message(1), None)
        .await
        .unwrap();

    // Unknown quota admits the very first request without queueing.
    assert_eq!(response.status, 200);
    assert_eq!(mock.call_count(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_headerless_responses_keep_admitting() {
    let mock = MockTransport::new();
    let client = RestClient::new(mock.clone());

    // No quota headers ever: bucket stays unknown, nothing queues.
    for i in 0..5u64 {
        client
            .request(Route::get_message(1, i), None)
            .await
            .unwrap();
    }
    assert_eq!(mock.call_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_quota_cycle_scenario() {
    let mock = MockTransport::new();
    mock.push_response(quota_response(4, 5, 2.0));
    mock.push_response(quota_response(3, 5, 2.0));
    mock.push_response(quota_response(2, 5, 2.0));
    mock.push_response(quota_response(0, 5, 2.0));
    let client = Arc::new(RestClient::new(mock.clone()));

    let start = Instant::now();

    // First send establishes the quota; three more dispatch immediately
    // while remaining stays above zero.
    for i in 0..4u64 {
        client
            .request(Route::get_message(1, i), None)
            .await
            .unwrap();
    }
    assert_eq!(mock.call_count(), 4);
    assert_eq!(start.elapsed(), Duration::ZERO);

    // Fifth send hits remaining=0 and queues until the window resets.
    let fifth = spawn_request(&client, Route::get_message(1, 99)).await;
    assert_eq!(mock.call_count(), 4);

    let response = fifth.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(mock.call_count(), 5);
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_cold_bucket_burst_sends_single_probe() {
    let mock = MockTransport::new();
    mock.push_response(quota_response(0, 5, 2.0));
    let client = Arc::new(RestClient::new(mock.clone()));

    let start = Instant::now();
    // Three concurrent calls against a fresh bucket: the unknown quota
    // holds exactly one optimistic slot, so one probe goes out and the
    // rest queue behind it.
    let first = spawn_request(&client, Route::get_message(8, 0)).await;
    let second = spawn_request(&client, Route::get_message(8, 1)).await;
    let third = spawn_request(&client, Route::get_message(8, 2)).await;

    first.await.unwrap().unwrap();
    assert_eq!(mock.call_count(), 1);

    // The probe's response reported an exhausted window; the queued
    // burst drains only when it resets.
    second.await.unwrap().unwrap();
    third.await.unwrap().unwrap();
    assert_eq!(mock.call_count(), 3);
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(
        mock.endpoints(),
        vec![
            "/channels/8/messages/0",
            "/channels/8/messages/1",
            "/channels/8/messages/2",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_probe_response_with_capacity_releases_queue() {
    let mock = MockTransport::new();
    mock.push_response(quota_response(4, 5, 2.0));
    let client = Arc::new(RestClient::new(mock.clone()));

    let start = Instant::now();
    // Spawn both before yielding, so the second call queues behind the
    // in-flight probe rather than seeing its response.
    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.request(Route::get_message(9, 0), None).await })
    };
    let second = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.request(Route::get_message(9, 1), None).await })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    // remaining=4 after the probe: the queued call goes out on the
    // probe's completion, not a window reset later.
    assert_eq!(mock.call_count(), 2);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_bucket_isolation_across_major_args() {
    let mock = MockTransport::new();
    // Exhaust channel 1's bucket for a long window.
    mock.push_response(quota_response(0, 5, 60.0));
    let client = Arc::new(RestClient::new(mock.clone()));

    client
        .request(Route::get_message(1, 1), None)
        .await
        .unwrap();

    // Channel 2 shares the route and method but not the bucket.
    client
        .request(Route::get_message(2, 1), None)
        .await
        .unwrap();
    assert_eq!(mock.call_count(), 2);
    assert_eq!(client.bucket_count(), 2);

    // Channel 1 queues; nothing reaches the transport for it.
    let queued = spawn_request(&client, Route::get_message(1, 2)).await;
    let waited = timeout(Duration::from_secs(5), queued).await;
    assert!(waited.is_err(), "queued request should still be pending");
    assert_eq!(mock.call_count(), 2);
}

// ============================================================================
// FIFO Queue & Refill
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_queue_drains_in_fifo_order() {
    let mock = MockTransport::new();
    mock.push_response(quota_response(0, 3, 1.0));
    let client = Arc::new(RestClient::new(mock.clone()));

    client
        .request(Route::get_message(7, 0), None)
        .await
        .unwrap();

    // Enqueue three requests in a known order against the exhausted
    // bucket.
    let mut queued = Vec::new();
    for i in 1..=3u64 {
        queued.push(spawn_request(&client, Route::get_message(7, i)).await);
    }
    assert_eq!(mock.call_count(), 1);

    for handle in queued {
        handle.await.unwrap().unwrap();
    }

    // Refill restored the full window, so the whole backlog drained in
    // exactly the order it was enqueued.
    assert_eq!(
        mock.endpoints(),
        vec![
            "/channels/7/messages/0",
            "/channels/7/messages/1",
            "/channels/7/messages/2",
            "/channels/7/messages/3",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_single_refill_timer_per_window() {
    let mock = MockTransport::new();
    // Two responses land in the same window and both carry reset
    // timing. Only the first may arm the timer: a second armed timer
    // would refill the next window early.
    mock.push_response(quota_response(1, 1, 1.0));
    mock.push_response(quota_response(0, 1, 1.0));
    // The first drained item's response opens the window after it.
    mock.push_response(quota_response(0, 1, 1.0));
    let client = Arc::new(RestClient::new(mock.clone()));

    let start = Instant::now();
    client
        .request(Route::get_message(3, 0), None)
        .await
        .unwrap();
    client
        .request(Route::get_message(3, 1), None)
        .await
        .unwrap();
    assert_eq!(mock.call_count(), 2);

    // Two queued items, window limit 1: the first drains at t=1, the
    // second must wait for the window opened by the first's response.
    let q1 = spawn_request(&client, Route::get_message(3, 2)).await;
    let q2 = spawn_request(&client, Route::get_message(3, 3)).await;

    q1.await.unwrap().unwrap();
    let after_q1 = start.elapsed();
    assert!(after_q1 >= Duration::from_secs(1));
    assert!(after_q1 < Duration::from_millis(1500));

    q2.await.unwrap().unwrap();
    let after_q2 = start.elapsed();
    assert!(
        after_q2 >= Duration::from_secs(2),
        "second queued item drained after {after_q2:?}; a duplicate \
         refill timer would have released it a window early"
    );
    assert_eq!(mock.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_missing_reset_headers_stall_queue() {
    let mock = MockTransport::new();
    // Exhausted, but no reset signal: nothing to arm.
    let mut headers = HashMap::new();
    headers.insert("x-ratelimit-remaining".to_string(), "0".to_string());
    mock.push_response(ApiResponse {
        status: 200,
        headers,
        body: None,
    });
    let client = Arc::new(RestClient::new(mock.clone()));

    client
        .request(Route::get_message(4, 0), None)
        .await
        .unwrap();

    let queued = spawn_request(&client, Route::get_message(4, 1)).await;
    let waited = timeout(Duration::from_secs(30), queued).await;
    assert!(waited.is_err(), "no reset timing means no refill");
    assert_eq!(mock.call_count(), 1);
}

// ============================================================================
// Error Taxonomy
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unauthorized_is_terminal_and_published() {
    let mock = MockTransport::new();
    mock.push_response(plain_response(401));
    let client = RestClient::new(mock.clone());
    let mut events = client.events();

    let result = client.request(Route::create_message(1), None).await;
    assert!(matches!(result, Err(RestError::Unauthorized)));

    // The connection layer learns about it through the event channel.
    let event = events.recv().await.unwrap();
    assert_eq!(event, RestEvent::AuthenticationFailed);
}

#[tokio::test(start_paused = true)]
async fn test_forbidden_and_desync_are_terminal() {
    let mock = MockTransport::new();
    mock.push_response(plain_response(403));
    mock.push_response(plain_response(429));
    let client = RestClient::new(mock.clone());

    let result = client.request(Route::get_message(1, 1), None).await;
    assert!(matches!(result, Err(RestError::Forbidden)));

    let result = client.request(Route::get_message(1, 2), None).await;
    assert!(matches!(result, Err(RestError::QuotaDesync)));

    // Not retried: exactly one transport call each.
    assert_eq!(mock.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_other_statuses_pass_through() {
    let mock = MockTransport::new();
    mock.push_response(plain_response(404));
    let client = RestClient::new(mock.clone());

    let response = client
        .request(Route::get_message(1, 1), None)
        .await
        .unwrap();
    assert_eq!(response.status, 404);
    assert!(!response.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_leaves_bucket_usable() {
    let mock = MockTransport::new();
    mock.push_failure("connection reset");
    let client = RestClient::new(mock.clone());

    let result = client.request(Route::create_message(9), None).await;
    assert!(matches!(result, Err(RestError::Transport(_))));

    // Quota was never overwritten by the failed call; the next request
    // dispatches immediately.
    let response = client
        .request(Route::create_message(9), None)
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(mock.call_count(), 2);
}

// ============================================================================
// Router
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_bucket_created_once_per_key() {
    let mock = MockTransport::new();
    let client = RestClient::new(mock.clone());

    for i in 0..10u64 {
        client
            .request(Route::get_message(5, i), None)
            .await
            .unwrap();
    }
    assert_eq!(client.bucket_count(), 1);

    client
        .request(Route::create_message(5), None)
        .await
        .unwrap();
    assert_eq!(client.bucket_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unrendered_route_is_rejected_before_transport() {
    let mock = MockTransport::new();
    let client = RestClient::new(mock.clone());

    let route = corvid_core::Route::new(corvid_core::Method::Get, "/channels/{channel_id}");
    let result = client.request(route, None).await;
    assert!(matches!(result, Err(RestError::Route(_))));
    assert_eq!(mock.call_count(), 0);
}
