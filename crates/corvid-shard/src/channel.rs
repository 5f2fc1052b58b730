//! Worker-side channel to the supervisor.
//!
//! Lives inside each worker process. The pump reads supervisor frames
//! from the parent pipe, invokes locally registered command handlers,
//! and re-emits bot events on the worker's local event bus. The handle
//! is the worker's way to query its siblings through the supervisor.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use corvid_core::{ShardId, ShardIdentity, ShardState};
use corvid_protocol::{
    decode_line, encode_line, CorrelationTable, SupervisorMessage, WorkerMessage,
};

use crate::error::{ShardError, ShardResult};

/// Outbound queue depth.
const OUTBOUND_CAPACITY: usize = 64;
/// Local event bus depth.
const EVENT_CAPACITY: usize = 32;

/// Handler invoked for a supervisor communication request. Its return
/// value travels back as the correlated reply.
pub type CommandHandler = Box<dyn Fn(&ShardIdentity) -> Value + Send + Sync>;

/// Events delivered to the worker's local event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A bot event re-emitted by the supervisor.
    Event { event: String, args: Vec<Value> },
    /// The supervisor asked this worker to close its realtime
    /// connection with the given close code.
    Disconnect { code: u16 },
}

/// The worker-side endpoint of the supervision channel.
pub struct ShardChannel {
    identity: ShardIdentity,
    handlers: HashMap<String, CommandHandler>,
    outbound_tx: mpsc::Sender<WorkerMessage>,
    /// Taken by the write pump when `run` starts.
    outbound_rx: Option<mpsc::Receiver<WorkerMessage>>,
    correlations: Arc<CorrelationTable>,
    events: broadcast::Sender<ChannelEvent>,
    cancel: CancellationToken,
}

impl ShardChannel {
    pub fn new(identity: ShardIdentity) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            identity,
            handlers: HashMap::new(),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            correlations: Arc::new(CorrelationTable::new()),
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds a channel from the spawn environment variables.
    pub fn from_env() -> ShardResult<Self> {
        let identity = ShardIdentity::from_env().map_err(|e| {
            ShardError::Spawn(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                e.to_string(),
            ))
        })?;
        Ok(Self::new(identity))
    }

    /// Registers the handler invoked when the supervisor asks for
    /// `event`. Unregistered events answer `null`.
    pub fn on_command(
        &mut self,
        event: impl Into<String>,
        handler: impl Fn(&ShardIdentity) -> Value + Send + Sync + 'static,
    ) {
        self.handlers.insert(event.into(), Box::new(handler));
    }

    /// Returns the cheap-to-clone request/subscription handle.
    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle {
            identity: self.identity,
            outbound: self.outbound_tx.clone(),
            correlations: Arc::clone(&self.correlations),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Runs the channel over the worker's stdin/stdout.
    pub async fn run_stdio(self) {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await;
    }

    /// Pumps the channel until the pipe closes or the handle shuts it
    /// down. Communication requests are answered inline; replies are
    /// resolved against the correlation table.
    pub async fn run<R, W>(mut self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.identity.id;
        let Some(outbound_rx) = self.outbound_rx.take() else {
            warn!(shard = %id, "Channel already running");
            return;
        };
        tokio::spawn(write_pump(id, writer, outbound_rx, self.cancel.clone()));

        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => match decode_line::<SupervisorMessage>(&line) {
                    Ok(message) => self.handle_message(message).await,
                    Err(e) => {
                        warn!(shard = %id, error = %e, "Discarding malformed supervisor frame");
                    }
                },
                Ok(None) => {
                    debug!(shard = %id, "Supervisor pipe closed");
                    break;
                }
                Err(e) => {
                    warn!(shard = %id, error = %e, "Supervisor read failed");
                    break;
                }
            }
        }
    }

    async fn handle_message(&mut self, message: SupervisorMessage) {
        match message {
            SupervisorMessage::CommunicationRequest { id, event } => {
                let payload = match self.handlers.get(&event) {
                    Some(handler) => handler(&self.identity),
                    None => {
                        debug!(shard = %self.identity.id, event = %event, "No handler registered");
                        Value::Null
                    }
                };
                if self
                    .outbound_tx
                    .send(WorkerMessage::communication_reply(id, payload))
                    .await
                    .is_err()
                {
                    warn!(shard = %self.identity.id, "Outbound closed while replying");
                }
            }
            SupervisorMessage::CommunicationReply { id, payload } => {
                if !self.correlations.resolve(id, payload) {
                    warn!(shard = %self.identity.id, correlation = %id, "Unmatched supervisor reply");
                }
            }
            SupervisorMessage::EmitEvent { event, args } => {
                let _ = self.events.send(ChannelEvent::Event { event, args });
            }
            SupervisorMessage::Disconnect { code } => {
                let _ = self.events.send(ChannelEvent::Disconnect { code });
            }
        }
    }
}

/// Cheap-to-clone handle for issuing requests from worker code.
#[derive(Clone)]
pub struct ChannelHandle {
    identity: ShardIdentity,
    outbound: mpsc::Sender<WorkerMessage>,
    correlations: Arc<CorrelationTable>,
    events: broadcast::Sender<ChannelEvent>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    pub fn identity(&self) -> ShardIdentity {
        self.identity
    }

    /// Subscribes to the local event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Asks every shard (this one included) for `event`; results arrive
    /// in shard-id order. Never resolves if the supervisor dies first.
    pub async fn broadcast(&self, event: impl Into<String>) -> ShardResult<Vec<Value>> {
        let (id, rx) = self.correlations.register();
        self.send(WorkerMessage::broadcast(id, event.into())).await?;
        match rx.await.map_err(|_| ShardError::ChannelClosed)? {
            Value::Array(results) => Ok(results),
            other => Err(ShardError::BadReply(format!(
                "expected array of shard results, got {other}"
            ))),
        }
    }

    /// Asks exactly one shard for `event`.
    pub async fn send_to(&self, event: impl Into<String>, shard: ShardId) -> ShardResult<Value> {
        let (id, rx) = self.correlations.register();
        self.send(WorkerMessage::send_to(id, event.into(), shard))
            .await?;
        rx.await.map_err(|_| ShardError::ChannelClosed)
    }

    /// Reports this worker's lifecycle state to the supervisor.
    pub async fn set_state(&self, state: ShardState) -> ShardResult<()> {
        self.send(WorkerMessage::state_changed(state)).await
    }

    /// Asks the supervisor to disconnect every shard, this one
    /// included.
    pub async fn disconnect_all(&self, code: u16) -> ShardResult<()> {
        self.send(WorkerMessage::disconnect_all(code)).await
    }

    /// Stops the channel pump.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, message: WorkerMessage) -> ShardResult<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| ShardError::ChannelClosed)
    }
}

/// Drains outbound worker messages onto the parent pipe.
async fn write_pump<W>(
    id: ShardId,
    writer: W,
    mut outbound: mpsc::Receiver<WorkerMessage>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
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
            warn!(shard = %id, "Supervisor pipe closed while writing");
            break;
        }
    }
    debug!(shard = %id, "Worker write pump stopped");
}
