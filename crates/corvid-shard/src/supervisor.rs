//! Shard supervisor - owns the set of worker processes.
//!
//! The supervisor is an actor: it owns every shard record and the
//! shard-state table, processes handle commands and worker messages
//! sequentially, and publishes aggregate events. Fan-out queries run in
//! spawned tasks over cloned shard links so a slow worker never stalls
//! the actor loop.
//!
//! ```text
//! ┌──────────────────┐  commands   ┌──────────────────┐
//! │ SupervisorHandle │────────────▶│ SupervisorActor  │
//! └──────────────────┘             │  states, links   │
//!          ▲ events                └───┬──────────┬───┘
//!          │ (broadcast)               │          │ worker msgs
//!          └───────────────────────────┘          ▼
//!                                        ┌──────────────────┐
//!                                        │ Shard pump tasks │──▶ workers
//!                                        └──────────────────┘
//! ```

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use corvid_core::{ShardId, ShardIdentity, ShardState, ShardingConfig};
use corvid_protocol::{CorrelationId, SupervisorMessage, WorkerMessage};

use crate::connector::WorkerConnector;
use crate::error::{ShardError, ShardResult};
use crate::shard::{Shard, ShardLink};

/// Command channel depth for the supervisor actor.
const COMMAND_CAPACITY: usize = 64;
/// Inbound worker-message channel depth.
const INBOUND_CAPACITY: usize = 256;
/// Aggregate event channel depth.
const EVENT_CAPACITY: usize = 16;

/// Commands sent to the supervisor actor.
#[derive(Debug)]
enum SupervisorCommand {
    /// Query every shard for `event`; results in shard-id order.
    Broadcast {
        event: String,
        respond_to: oneshot::Sender<ShardResult<Vec<Value>>>,
    },

    /// Query exactly one shard for `event`.
    SendTo {
        event: String,
        shard: ShardId,
        respond_to: oneshot::Sender<ShardResult<Value>>,
    },

    /// Fire-and-forget: re-emit an event on every worker's local bus.
    EmitEvent { event: String, args: Vec<Value> },

    /// Tell every worker to close its realtime connection.
    DisconnectAll { code: u16 },

    /// Snapshot of the shard-state table.
    GetStates {
        respond_to: oneshot::Sender<Vec<(ShardId, Option<ShardState>)>>,
    },
}

/// Aggregate events published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Every shard now reports the same lifecycle state. Fired once per
    /// convergence, not once per shard report.
    AllShards { state: ShardState },
}

/// Handle for interacting with a running supervisor.
///
/// Cheap to clone; all methods communicate with the actor via channels.
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorCommand>,
    events: broadcast::Sender<SupervisorEvent>,
    cancel: CancellationToken,
}

impl SupervisorHandle {
    /// Queries every shard for `event`; results arrive in shard-id
    /// order regardless of individual reply latency.
    pub async fn broadcast(&self, event: impl Into<String>) -> ShardResult<Vec<Value>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::Broadcast {
                event: event.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| ShardError::ChannelClosed)?;
        rx.await.map_err(|_| ShardError::ChannelClosed)?
    }

    /// Queries one shard for `event`.
    pub async fn send_to(&self, event: impl Into<String>, shard: ShardId) -> ShardResult<Value> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::SendTo {
                event: event.into(),
                shard,
                respond_to: tx,
            })
            .await
            .map_err(|_| ShardError::ChannelClosed)?;
        rx.await.map_err(|_| ShardError::ChannelClosed)?
    }

    /// Re-emits `event` with `args` on every worker's local event bus.
    pub async fn emit_event(&self, event: impl Into<String>, args: Vec<Value>) -> ShardResult<()> {
        self.sender
            .send(SupervisorCommand::EmitEvent {
                event: event.into(),
                args,
            })
            .await
            .map_err(|_| ShardError::ChannelClosed)
    }

    /// Tells every worker to close its realtime connection.
    pub async fn disconnect_all(&self, code: u16) -> ShardResult<()> {
        self.sender
            .send(SupervisorCommand::DisconnectAll { code })
            .await
            .map_err(|_| ShardError::ChannelClosed)
    }

    /// Snapshot of each shard's last reported lifecycle state.
    pub async fn shard_states(&self) -> ShardResult<Vec<(ShardId, Option<ShardState>)>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SupervisorCommand::GetStates { respond_to: tx })
            .await
            .map_err(|_| ShardError::ChannelClosed)?;
        rx.await.map_err(|_| ShardError::ChannelClosed)
    }

    /// Subscribes to aggregate events.
    pub fn events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Stops the actor and the shard pump tasks. Worker processes are
    /// not killed; they notice the closed pipe on their own.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// The shard supervisor.
pub struct ShardSupervisor;

impl ShardSupervisor {
    /// Spawns all workers and starts the supervision actor.
    ///
    /// Shard records are created up front with ids `0..shard_count`.
    /// Workers are spawned strictly sequentially with the configured
    /// stagger between consecutive spawns - a hard external constraint:
    /// the remote gateway rate-limits new-connection handshakes, so no
    /// shard is ever spawned early, even if an earlier one has not
    /// become ready.
    ///
    /// # Errors
    ///
    /// `ShardError::Spawn` if the connector fails for any shard;
    /// already-spawned workers keep running.
    pub async fn start(
        config: &ShardingConfig,
        connector: Arc<dyn WorkerConnector>,
    ) -> ShardResult<SupervisorHandle> {
        let cancel = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let count = config.shard_count;
        let stagger = config.stagger();
        let mut shards = Vec::with_capacity(count as usize);

        for index in 0..count {
            if index > 0 {
                sleep(stagger).await;
            }
            let id = ShardId(index);
            let identity = ShardIdentity::new(id, count);
            let link = connector.connect(identity).await?;
            shards.push(Shard::attach(id, link, inbound_tx.clone(), cancel.clone()));
            debug!(shard = %id, "Shard attached");
        }

        info!(shards = count, "All shards spawned");

        let actor = SupervisorActor {
            links: shards.iter().map(Shard::link).collect(),
            shards,
            states: vec![None; count as usize],
            last_converged: None,
            commands: command_rx,
            inbound: inbound_rx,
            events: event_tx.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(actor.run());

        Ok(SupervisorHandle {
            sender: command_tx,
            events: event_tx,
            cancel,
        })
    }
}

/// The supervisor actor - single owner of the shard-state table.
struct SupervisorActor {
    /// Shard records; index equals shard id. Held for child-process
    /// lifetime even though commands only go through the links.
    #[allow(dead_code)]
    shards: Vec<Shard>,

    /// Cloned links in shard-id order, for fan-out tasks.
    links: Vec<ShardLink>,

    /// Last reported state per shard; `None` until the first report.
    /// Mutated only by `StateChanged` messages, never inferred.
    states: Vec<Option<ShardState>>,

    /// Last state every shard agreed on; dedupes the aggregate event.
    last_converged: Option<ShardState>,

    commands: mpsc::Receiver<SupervisorCommand>,
    inbound: mpsc::Receiver<(ShardId, WorkerMessage)>,
    events: broadcast::Sender<SupervisorEvent>,
    cancel: CancellationToken,
}

impl SupervisorActor {
    async fn run(mut self) {
        info!("Supervisor actor starting");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                message = self.inbound.recv() => match message {
                    Some((id, message)) => self.handle_worker(id, message).await,
                    None => break,
                },
            }
        }

        info!("Supervisor actor stopped");
    }

    async fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::Broadcast { event, respond_to } => {
                let links = self.links.clone();
                tokio::spawn(async move {
                    let _ = respond_to.send(collect_broadcast(&links, &event).await);
                });
            }
            SupervisorCommand::SendTo {
                event,
                shard,
                respond_to,
            } => match self.links.get(shard.as_index()).cloned() {
                Some(link) => {
                    tokio::spawn(async move {
                        let _ = respond_to.send(link.communicate(&event).await);
                    });
                }
                None => {
                    let _ = respond_to.send(Err(ShardError::NoSuchShard(shard)));
                }
            },
            SupervisorCommand::EmitEvent { event, args } => {
                for link in &self.links {
                    let message = SupervisorMessage::emit_event(event.clone(), args.clone());
                    if link.send(message).await.is_err() {
                        warn!(shard = %link.id, "Dropping event for closed shard");
                    }
                }
            }
            SupervisorCommand::DisconnectAll { code } => {
                self.disconnect_all(code).await;
            }
            SupervisorCommand::GetStates { respond_to } => {
                let snapshot = self
                    .states
                    .iter()
                    .enumerate()
                    .map(|(i, state)| (ShardId(i as u16), *state))
                    .collect();
                let _ = respond_to.send(snapshot);
            }
        }
    }

    async fn handle_worker(&mut self, id: ShardId, message: WorkerMessage) {
        match message {
            WorkerMessage::CommunicationReply {
                id: correlation,
                payload,
            } => {
                if let Some(link) = self.links.get(id.as_index()) {
                    link.resolve(correlation, payload);
                }
            }
            WorkerMessage::Broadcast {
                id: correlation,
                event,
            } => {
                // Query every shard (the requester included) and answer
                // the requester once, tagged with its original id.
                let links = self.links.clone();
                let origin = self.links.get(id.as_index()).cloned();
                tokio::spawn(async move {
                    reply_to_origin(
                        origin,
                        correlation,
                        collect_broadcast(&links, &event).await.map(Value::Array),
                    )
                    .await;
                });
            }
            WorkerMessage::SendTo {
                id: correlation,
                event,
                shard,
            } => {
                let target = self.links.get(shard.as_index()).cloned();
                let origin = self.links.get(id.as_index()).cloned();
                tokio::spawn(async move {
                    let result = match target {
                        Some(link) => link.communicate(&event).await,
                        None => Err(ShardError::NoSuchShard(shard)),
                    };
                    reply_to_origin(origin, correlation, result).await;
                });
            }
            WorkerMessage::StateChanged { state } => {
                if let Some(slot) = self.states.get_mut(id.as_index()) {
                    *slot = Some(state);
                    debug!(shard = %id, state = %state, "Shard state changed");
                }
                self.check_convergence();
            }
            WorkerMessage::DisconnectAll { code } => {
                debug!(shard = %id, code, "Worker requested disconnect of all shards");
                self.disconnect_all(code).await;
            }
        }
    }

    /// Emits one aggregate event when every shard reports the same
    /// state - exactly once per convergence, not once per report.
    fn check_convergence(&mut self) {
        let Some(Some(first)) = self.states.first().copied() else {
            return;
        };
        if !self.states.iter().all(|s| *s == Some(first)) {
            return;
        }
        if self.last_converged == Some(first) {
            return;
        }
        self.last_converged = Some(first);
        info!(state = %first, shards = self.states.len(), "All shards converged");
        let _ = self.events.send(SupervisorEvent::AllShards { state: first });
    }

    /// Sends a disconnect to every shard, including a requester.
    async fn disconnect_all(&self, code: u16) {
        for link in &self.links {
            if link
                .send(SupervisorMessage::disconnect(code))
                .await
                .is_err()
            {
                warn!(shard = %link.id, "Dropping disconnect for closed shard");
            }
        }
    }
}

/// Issues a communication request to every link before awaiting any
/// reply, then collects results in shard-id order. A worker that died
/// before replying leaves its receiver pending forever, so this future
/// simply never resolves in that case - the caller owns any timeout.
async fn collect_broadcast(links: &[ShardLink], event: &str) -> ShardResult<Vec<Value>> {
    let mut pending = Vec::with_capacity(links.len());
    for link in links {
        pending.push(link.begin_communicate(event).await?);
    }

    let mut results = Vec::with_capacity(pending.len());
    for rx in pending {
        results.push(rx.await.map_err(|_| ShardError::ChannelClosed)?);
    }
    Ok(results)
}

/// Answers a worker-initiated query, tagged with its original
/// identifier. A query the supervisor itself saw fail (nonexistent
/// target shard, closed link) still answers, with a null payload, so
/// the requester's future always resolves.
async fn reply_to_origin(
    origin: Option<ShardLink>,
    correlation: CorrelationId,
    result: ShardResult<Value>,
) {
    let Some(origin) = origin else {
        return;
    };
    let payload = match result {
        Ok(payload) => payload,
        Err(e) => {
            warn!(shard = %origin.id, error = %e, "Worker query failed, answering null");
            Value::Null
        }
    };
    if origin
        .send(SupervisorMessage::communication_reply(correlation, payload))
        .await
        .is_err()
    {
        warn!(shard = %origin.id, "Requester gone before its reply");
    }
}
