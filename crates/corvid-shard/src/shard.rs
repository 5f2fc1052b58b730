//! Supervisor-side link to one worker process.
//!
//! Each shard owns two pump tasks: a writer draining an outbound queue
//! of supervisor messages onto the worker's pipe, and a reader parsing
//! worker frames and forwarding them to the supervisor's inbound
//! channel. Correlated requests register on the shard's own table before
//! their frame is queued, so a reply can never race its registration.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use corvid_core::ShardId;
use corvid_protocol::{
    decode_line, encode_line, CorrelationId, CorrelationTable, SupervisorMessage, WorkerMessage,
};

use crate::connector::WorkerLink;
use crate::error::{ShardError, ShardResult};

/// Outbound queue depth per shard.
const OUTBOUND_CAPACITY: usize = 64;

/// Cheap-to-clone sending side of a shard: enough to issue commands and
/// correlated requests from aggregation tasks without touching the
/// shard record itself.
#[derive(Clone)]
pub(crate) struct ShardLink {
    pub id: ShardId,
    outbound: mpsc::Sender<SupervisorMessage>,
    correlations: Arc<CorrelationTable>,
}

impl ShardLink {
    /// Queues one message for the worker.
    pub async fn send(&self, message: SupervisorMessage) -> ShardResult<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| ShardError::ChannelClosed)
    }

    /// Registers a correlated communication request and queues its
    /// frame. Returns the receiver for the worker's reply; awaiting it
    /// is the caller's business, so a fan-out can issue every request
    /// before blocking on any reply.
    pub async fn begin_communicate(
        &self,
        event: &str,
    ) -> ShardResult<tokio::sync::oneshot::Receiver<Value>> {
        let (id, rx) = self.correlations.register();
        self.send(SupervisorMessage::communication_request(id, event))
            .await?;
        Ok(rx)
    }

    /// Asks the worker to run its handler for `event` and returns the
    /// reply. Never resolves if the worker dies first; callers needing
    /// bounded latency race this against an external timeout.
    pub async fn communicate(&self, event: &str) -> ShardResult<Value> {
        let rx = self.begin_communicate(event).await?;
        rx.await.map_err(|_| ShardError::ChannelClosed)
    }

    /// Resolves a worker reply against this shard's pending requests.
    pub fn resolve(&self, id: CorrelationId, payload: Value) {
        if !self.correlations.resolve(id, payload) {
            warn!(shard = %self.id, correlation = %id, "Unmatched reply from worker");
        }
    }
}

/// One worker process, as the supervisor sees it.
pub(crate) struct Shard {
    link: ShardLink,
    /// Child handle for process workers; dropped (not killed) at
    /// supervisor shutdown. No respawn-on-crash.
    #[allow(dead_code)]
    child: Option<tokio::process::Child>,
}

impl Shard {
    /// Wires the pump tasks onto an established worker link.
    pub fn attach(
        id: ShardId,
        link: WorkerLink,
        inbound: mpsc::Sender<(ShardId, WorkerMessage)>,
        cancel: CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let shard = Self {
            link: ShardLink {
                id,
                outbound: outbound_tx,
                correlations: Arc::new(CorrelationTable::new()),
            },
            child: link.child,
        };

        tokio::spawn(write_pump(id, link.writer, outbound_rx, cancel.clone()));
        tokio::spawn(read_pump(id, link.reader, inbound, cancel));

        shard
    }

    pub fn link(&self) -> ShardLink {
        self.link.clone()
    }
}

/// Drains the outbound queue onto the worker's pipe.
async fn write_pump(
    id: ShardId,
    writer: crate::connector::BoxedWriter,
    mut outbound: mpsc::Receiver<SupervisorMessage>,
    cancel: CancellationToken,
) {
    let mut writer = BufWriter::new(writer);
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = outbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!(shard = %id, error = %e, "Dropping unencodable frame");
                continue;
            }
        };
        if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
            warn!(shard = %id, "Worker pipe closed while writing");
            break;
        }
    }
    debug!(shard = %id, "Write pump stopped");
}

/// Parses worker frames and forwards them to the supervisor.
async fn read_pump(
    id: ShardId,
    reader: crate::connector::BoxedReader,
    inbound: mpsc::Sender<(ShardId, WorkerMessage)>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => match decode_line::<WorkerMessage>(&line) {
                Ok(message) => {
                    if inbound.send((id, message)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(shard = %id, error = %e, "Discarding malformed worker frame");
                }
            },
            Ok(None) => {
                // Worker stream closed. The process is gone (or closed
                // its stdout); pending correlated requests to it will
                // never resolve, and no respawn is attempted.
                warn!(shard = %id, "Worker stream closed");
                break;
            }
            Err(e) => {
                warn!(shard = %id, error = %e, "Worker read failed");
                break;
            }
        }
    }
    debug!(shard = %id, "Read pump stopped");
}
