//! `RoomRegistryActor` - singleton that owns the set of live rooms.
//!
//! The registry:
//! - Gets or creates rooms on join (one router per room, first caller wins)
//! - Retires rooms once they report idle and confirm they are still empty
//! - Supervises room actors and detects panics
//! - Swaps the media engine after a worker relaunch
//! - Stops accepting rooms during graceful shutdown
//!
//! Router creation and retirement run in spawned tasks and report back on an
//! internal lifecycle channel, so a slow media engine never holds up joins to
//! other rooms. While a room id is being created or retired its joins wait on
//! the registry entry: concurrent joins for a new id share one router, and a
//! join never reaches a room that is about to stop. Joins for a live room are
//! forwarded into its mailbox before the registry moves on, which orders them
//! ahead of any later `CloseIfEmpty`.

use crate::errors::CoordinatorError;
use crate::media::{MediaEngine, MediaError, MediaEventReceiver, MediaRouter};
use crate::observability::metrics;
use crate::protocol::JoinRoomAck;
use crate::sink::EventSink;

use super::messages::{RegistryMessage, RegistryStatus, Reply};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomSettings};

use common::types::{PeerId, RoomId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for each room actor to finish.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle to the `RoomRegistryActor`.
///
/// All methods are async and return results via oneshot channels.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Spawn the registry and return a handle to it.
    ///
    /// # Arguments
    ///
    /// * `instance_id` - Coordinator instance ID (for logs)
    /// * `engine` - Media worker that rooms allocate routers on
    /// * `settings` - Settings shared by every room
    /// * `metrics` - Shared actor metrics
    #[must_use]
    pub fn new(
        instance_id: String,
        engine: Arc<dyn MediaEngine>,
        settings: RoomSettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor::new(
            instance_id,
            receiver,
            cancel_token.clone(),
            engine,
            Arc::new(settings),
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Join `peer_id` to `room_id`, creating the room if needed.
    ///
    /// Returns the room handle the connection uses for later requests.
    pub async fn join_room(
        &self,
        room_id: RoomId,
        peer_id: PeerId,
        user_metadata: Value,
        sink: EventSink,
    ) -> Result<(RoomActorHandle, JoinRoomAck), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::JoinRoom {
                room_id,
                peer_id,
                user_metadata,
                sink,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Look up a live room.
    pub async fn get_room(&self, room_id: RoomId) -> Result<Option<RoomActorHandle>, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Close every live room and allocate future rooms on `engine`.
    pub async fn replace_engine(&self, engine: Arc<dyn MediaEngine>) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::ReplaceEngine {
                engine,
                respond_to: tx,
            })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting rooms and close the live ones.
    pub async fn shutdown(&self) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the registry (propagates to rooms and connections).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for connection actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    /// Distinguishes successive rooms created under the same id.
    serial: u64,
}

/// A join waiting on its room's router creation or retirement.
struct PendingJoin {
    peer_id: PeerId,
    user_metadata: Value,
    sink: EventSink,
    respond_to: Reply<(RoomActorHandle, JoinRoomAck)>,
}

/// Registry entry for one room id.
enum RoomSlot {
    /// Router creation in flight; joins for the id wait here.
    Creating { waiting: Vec<PendingJoin> },
    Live(ManagedRoom),
    /// Close-if-empty in flight; joins for the id wait here.
    Retiring {
        managed: ManagedRoom,
        waiting: Vec<PendingJoin>,
    },
}

/// Why a router could not be created. Shared by every join waiting on it.
#[derive(Debug, Clone)]
enum CreateFailure {
    Engine(MediaError),
    TimedOut,
}

impl From<CreateFailure> for CoordinatorError {
    fn from(failure: CreateFailure) -> Self {
        match failure {
            CreateFailure::Engine(e) => e.into(),
            CreateFailure::TimedOut => CoordinatorError::Timeout("create_router".to_string()),
        }
    }
}

/// Why the registry refuses to create a room.
#[derive(Debug, Clone, Copy)]
enum Refusal {
    Draining,
    AtCapacity,
}

impl From<Refusal> for CoordinatorError {
    fn from(refusal: Refusal) -> Self {
        match refusal {
            Refusal::Draining => CoordinatorError::Draining,
            Refusal::AtCapacity => CoordinatorError::Conflict("room capacity reached".to_string()),
        }
    }
}

/// Outcome of a close-if-empty request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retirement {
    /// The room was still empty and has stopped.
    Closed,
    /// A join reached the room first.
    Kept,
    /// The room did not answer in time.
    Unresponsive,
}

/// Completions of work the registry runs outside its mailbox.
enum Lifecycle {
    RoomCreated {
        room_id: RoomId,
        generation: u64,
        result: Result<(Box<dyn MediaRouter>, MediaEventReceiver), CreateFailure>,
    },
    RoomRetired {
        room_id: RoomId,
        serial: u64,
        outcome: Retirement,
    },
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    instance_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    engine: Arc<dyn MediaEngine>,
    /// Bumped on every engine swap; routers from an older engine are discarded.
    engine_generation: u64,
    settings: Arc<RoomSettings>,
    rooms: HashMap<RoomId, RoomSlot>,
    next_serial: u64,
    /// Idle notices from rooms that just lost their last peer.
    idle_tx: mpsc::UnboundedSender<RoomId>,
    idle_rx: mpsc::UnboundedReceiver<RoomId>,
    lifecycle_tx: mpsc::UnboundedSender<Lifecycle>,
    lifecycle_rx: mpsc::UnboundedReceiver<Lifecycle>,
    accepting_new: bool,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    fn new(
        instance_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        engine: Arc<dyn MediaEngine>,
        settings: Arc<RoomSettings>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Registry, &instance_id);
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();

        Self {
            instance_id,
            receiver,
            cancel_token,
            engine,
            engine_generation: 0,
            settings,
            rooms: HashMap::new(),
            next_serial: 0,
            idle_tx,
            idle_rx,
            lifecycle_tx,
            lifecycle_rx,
            accepting_new: true,
            metrics,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rtc.actor.registry", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "rtc.actor.registry",
            instance_id = %self.instance_id,
            "RoomRegistryActor started"
        );

        loop {
            self.check_room_health().await;

            // Room lifecycle changes go ahead of new requests.
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rtc.actor.registry",
                        instance_id = %self.instance_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                Some(room_id) = self.idle_rx.recv() => {
                    self.begin_retire(room_id);
                }

                Some(event) = self.lifecycle_rx.recv() => {
                    self.handle_lifecycle(event).await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.message_received();
                            self.handle_message(message).await;
                            self.mailbox.message_handled();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rtc.actor.registry",
                                instance_id = %self.instance_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rtc.actor.registry",
            instance_id = %self.instance_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::JoinRoom {
                room_id,
                peer_id,
                user_metadata,
                sink,
                respond_to,
            } => {
                let join = PendingJoin {
                    peer_id,
                    user_metadata,
                    sink,
                    respond_to,
                };
                self.join_room(room_id, join).await;
            }

            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let room = match self.rooms.get(&room_id) {
                    Some(RoomSlot::Live(managed)) => Some(managed.handle.clone()),
                    _ => None,
                };
                let _ = respond_to.send(room);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::ReplaceEngine { engine, respond_to } => {
                self.engine_generation += 1;
                let orphaned = self.close_all_rooms().await;
                self.engine = engine;
                info!(
                    target: "rtc.actor.registry",
                    instance_id = %self.instance_id,
                    "Media engine replaced"
                );
                for (room_id, waiting) in orphaned {
                    self.start_creating(room_id, waiting);
                }
                let _ = respond_to.send(());
            }

            RegistryMessage::Shutdown { respond_to } => {
                info!(
                    target: "rtc.actor.registry",
                    instance_id = %self.instance_id,
                    room_count = self.rooms.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.refuse_creating(Refusal::Draining);
                for (_, waiting) in self.close_all_rooms().await {
                    refuse(waiting, Refusal::Draining);
                }
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    /// Route a join to its room.
    ///
    /// Live rooms get the join queued at once. Joins for a room that is being
    /// created or retired wait on the slot, so router creation never holds up
    /// joins to other rooms and concurrent joins for a new id share one router.
    async fn join_room(&mut self, room_id: RoomId, join: PendingJoin) {
        match self.rooms.get_mut(&room_id) {
            Some(RoomSlot::Live(managed)) => {
                let handle = managed.handle.clone();
                forward_join(handle, join).await;
            }
            Some(RoomSlot::Creating { waiting } | RoomSlot::Retiring { waiting, .. }) => {
                debug!(
                    target: "rtc.actor.registry",
                    room_id = %room_id,
                    waiting = waiting.len() + 1,
                    "Join waiting on room lifecycle"
                );
                waiting.push(join);
            }
            None => match self.refusal() {
                Some(refusal) => {
                    let _ = join.respond_to.send(Err(refusal.into()));
                }
                None => self.start_creating(room_id, vec![join]),
            },
        }
    }

    /// Whether a new room may be created right now.
    fn refusal(&self) -> Option<Refusal> {
        if !self.accepting_new {
            return Some(Refusal::Draining);
        }
        if self.rooms.len() >= self.settings.max_rooms {
            warn!(
                target: "rtc.actor.registry",
                instance_id = %self.instance_id,
                max_rooms = self.settings.max_rooms,
                "Room capacity reached"
            );
            return Some(Refusal::AtCapacity);
        }
        None
    }

    /// Allocate a router for `room_id` off the registry's mailbox.
    fn start_creating(&mut self, room_id: RoomId, waiting: Vec<PendingJoin>) {
        self.rooms
            .insert(room_id.clone(), RoomSlot::Creating { waiting });

        let engine = Arc::clone(&self.engine);
        let codecs = self.settings.codecs.clone();
        let media_timeout = self.settings.media_timeout;
        let generation = self.engine_generation;
        let lifecycle_tx = self.lifecycle_tx.clone();

        tokio::spawn(async move {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let start = Instant::now();
            let created = tokio::time::timeout(
                media_timeout,
                engine.create_router(&room_id, codecs, events_tx),
            )
            .await;
            metrics::record_media_latency("create_router", start.elapsed());

            let result = match created {
                Ok(Ok(router)) => Ok((router, events_rx)),
                Ok(Err(e)) => Err(CreateFailure::Engine(e)),
                Err(_) => Err(CreateFailure::TimedOut),
            };
            let _ = lifecycle_tx.send(Lifecycle::RoomCreated {
                room_id,
                generation,
                result,
            });
        });
    }

    async fn handle_lifecycle(&mut self, event: Lifecycle) {
        match event {
            Lifecycle::RoomCreated {
                room_id,
                generation,
                result,
            } => self.room_created(room_id, generation, result).await,
            Lifecycle::RoomRetired {
                room_id,
                serial,
                outcome,
            } => self.room_retired(room_id, serial, outcome).await,
        }
    }

    async fn room_created(
        &mut self,
        room_id: RoomId,
        generation: u64,
        result: Result<(Box<dyn MediaRouter>, MediaEventReceiver), CreateFailure>,
    ) {
        let waiting = match self.rooms.remove(&room_id) {
            Some(RoomSlot::Creating { waiting }) => waiting,
            other => {
                // Shutdown gave up on this room while the router was being made.
                if let Some(slot) = other {
                    self.rooms.insert(room_id, slot);
                }
                if let Ok((router, _)) = result {
                    router.close().await;
                }
                return;
            }
        };

        if generation != self.engine_generation {
            if let Ok((router, _)) = result {
                router.close().await;
            }
            debug!(
                target: "rtc.actor.registry",
                room_id = %room_id,
                "Router came from a replaced engine, creating again"
            );
            self.start_creating(room_id, waiting);
            return;
        }

        match result {
            Ok((router, events_rx)) => {
                let handle = self.spawn_room(room_id, router, events_rx);
                for join in waiting {
                    forward_join(handle.clone(), join).await;
                }
            }
            Err(failure) => {
                match &failure {
                    CreateFailure::Engine(e) => warn!(
                        target: "rtc.actor.registry",
                        room_id = %room_id,
                        error = %e,
                        "Router creation failed"
                    ),
                    CreateFailure::TimedOut => warn!(
                        target: "rtc.actor.registry",
                        room_id = %room_id,
                        "Router creation timed out"
                    ),
                }
                for join in waiting {
                    let _ = join.respond_to.send(Err(failure.clone().into()));
                }
            }
        }
    }

    fn spawn_room(
        &mut self,
        room_id: RoomId,
        router: Box<dyn MediaRouter>,
        events_rx: MediaEventReceiver,
    ) -> RoomActorHandle {
        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            router,
            events_rx,
            Arc::clone(&self.settings),
            self.idle_tx.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.next_serial += 1;
        self.rooms.insert(
            room_id.clone(),
            RoomSlot::Live(ManagedRoom {
                handle: handle.clone(),
                task_handle,
                serial: self.next_serial,
            }),
        );
        self.metrics.room_created();

        info!(
            target: "rtc.actor.registry",
            instance_id = %self.instance_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        handle
    }

    /// Handle an idle notice: ask the room to stop if it is still empty.
    ///
    /// The answer comes back as `RoomRetired`; joins arriving meanwhile wait on
    /// the slot instead of reaching a room that may be about to stop.
    fn begin_retire(&mut self, room_id: RoomId) {
        let managed = match self.rooms.remove(&room_id) {
            Some(RoomSlot::Live(managed)) => managed,
            Some(other) => {
                self.rooms.insert(room_id, other);
                return;
            }
            None => return,
        };

        let handle = managed.handle.clone();
        let serial = managed.serial;
        self.rooms.insert(
            room_id.clone(),
            RoomSlot::Retiring {
                managed,
                waiting: Vec::new(),
            },
        );

        let deadline = self.settings.media_timeout.saturating_mul(2);
        let lifecycle_tx = self.lifecycle_tx.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(deadline, handle.close_if_empty()).await {
                Ok(Ok(true)) => Retirement::Closed,
                Ok(Ok(false)) => Retirement::Kept,
                Ok(Err(_)) | Err(_) => Retirement::Unresponsive,
            };
            let _ = lifecycle_tx.send(Lifecycle::RoomRetired {
                room_id,
                serial,
                outcome,
            });
        });
    }

    async fn room_retired(&mut self, room_id: RoomId, serial: u64, outcome: Retirement) {
        let (managed, waiting) = match self.rooms.remove(&room_id) {
            Some(RoomSlot::Retiring { managed, waiting }) if managed.serial == serial => {
                (managed, waiting)
            }
            Some(other) => {
                self.rooms.insert(room_id, other);
                return;
            }
            None => return,
        };

        match outcome {
            Retirement::Kept => {
                debug!(
                    target: "rtc.actor.registry",
                    room_id = %room_id,
                    "Room gained a peer before retiring, keeping it"
                );
                let handle = managed.handle.clone();
                self.rooms.insert(room_id, RoomSlot::Live(managed));
                for join in waiting {
                    forward_join(handle.clone(), join).await;
                }
                return;
            }
            Retirement::Closed => {}
            Retirement::Unresponsive => {
                warn!(
                    target: "rtc.actor.registry",
                    room_id = %room_id,
                    "Room did not confirm retirement, cancelling it"
                );
                managed.handle.cancel();
            }
        }

        self.reap(room_id.clone(), managed);
        info!(
            target: "rtc.actor.registry",
            instance_id = %self.instance_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room removed"
        );

        // Joins that arrived while the old room was retiring get a fresh one.
        if !waiting.is_empty() {
            match self.refusal() {
                Some(refusal) => refuse(waiting, refusal),
                None => self.start_creating(room_id, waiting),
            }
        }
    }

    /// Account for a removed room and wait for its task in the background.
    fn reap(&self, room_id: RoomId, managed: ManagedRoom) {
        self.metrics.room_removed();

        let instance_id = self.instance_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(Duration::from_secs(5), managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rtc.actor.registry",
                        instance_id = %instance_id,
                        room_id = %room_id,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rtc.actor.registry",
                        instance_id = %instance_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rtc.actor.registry",
                        instance_id = %instance_id,
                        room_id = %room_id,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });
    }

    /// Fail every join waiting on a router that is still being created.
    fn refuse_creating(&mut self, refusal: Refusal) {
        let creating: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, slot)| matches!(slot, RoomSlot::Creating { .. }))
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in creating {
            if let Some(RoomSlot::Creating { waiting }) = self.rooms.remove(&room_id) {
                refuse(waiting, refusal);
            }
        }
    }

    /// Close every room that has a router; their peers receive `room-closed`.
    ///
    /// Rooms still being created are left alone. Returns the joins that were
    /// waiting on a retiring room.
    async fn close_all_rooms(&mut self) -> Vec<(RoomId, Vec<PendingJoin>)> {
        let deadline = self.settings.media_timeout.saturating_mul(2);
        let slots: Vec<(RoomId, RoomSlot)> = self.rooms.drain().collect();
        let mut orphaned = Vec::new();

        for (room_id, slot) in slots {
            let (managed, waiting) = match slot {
                RoomSlot::Live(managed) => (managed, Vec::new()),
                RoomSlot::Retiring { managed, waiting } => (managed, waiting),
                creating @ RoomSlot::Creating { .. } => {
                    self.rooms.insert(room_id, creating);
                    continue;
                }
            };

            if tokio::time::timeout(deadline, managed.handle.close())
                .await
                .is_err()
            {
                warn!(
                    target: "rtc.actor.registry",
                    room_id = %room_id,
                    "Room close timed out, cancelling"
                );
                managed.handle.cancel();
            }
            self.reap(room_id.clone(), managed);

            if !waiting.is_empty() {
                orphaned.push((room_id, waiting));
            }
        }

        orphaned
    }

    /// Rooms that hold a router, in id order.
    fn get_status(&self) -> RegistryStatus {
        let mut room_ids: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, slot)| !matches!(slot, RoomSlot::Creating { .. }))
            .map(|(room_id, _)| room_id.clone())
            .collect();
        room_ids.sort();

        RegistryStatus {
            active_rooms: room_ids.len(),
            room_ids,
            is_draining: !self.accepting_new,
        }
    }

    /// Cancel and await all room actors.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "rtc.actor.registry",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;
        self.refuse_creating(Refusal::Draining);

        for slot in self.rooms.values() {
            if let RoomSlot::Live(managed) | RoomSlot::Retiring { managed, .. } = slot {
                managed.handle.cancel();
            }
        }

        for (room_id, slot) in self.rooms.drain() {
            let managed = match slot {
                RoomSlot::Live(managed) => managed,
                RoomSlot::Retiring { managed, waiting } => {
                    refuse(waiting, Refusal::Draining);
                    managed
                }
                RoomSlot::Creating { .. } => continue,
            };

            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rtc.actor.registry",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rtc.actor.registry",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rtc.actor.registry",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(
            target: "rtc.actor.registry",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop live rooms whose task ended without going through the registry.
    ///
    /// Retiring rooms are settled by their `RoomRetired` event instead.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, slot)| {
                matches!(slot, RoomSlot::Live(managed) if managed.task_handle.is_finished())
            })
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(RoomSlot::Live(managed)) = self.rooms.remove(&room_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "rtc.actor.registry",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "rtc.actor.registry",
                            instance_id = %self.instance_id,
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            self.metrics.room_removed();
        }
    }
}

/// Queue a join on a live room. The reply is forwarded from a spawned task so a
/// slow room never blocks the registry.
async fn forward_join(handle: RoomActorHandle, join: PendingJoin) {
    let PendingJoin {
        peer_id,
        user_metadata,
        sink,
        respond_to,
    } = join;

    let reply = match handle.enqueue_join(peer_id, user_metadata, sink).await {
        Ok(reply) => reply,
        Err(e) => {
            let _ = respond_to.send(Err(e));
            return;
        }
    };

    tokio::spawn(async move {
        let result = match reply.await {
            Ok(result) => result.map(|ack| (handle, ack)),
            Err(e) => Err(CoordinatorError::Internal(format!(
                "response receive failed: {e}"
            ))),
        };
        let _ = respond_to.send(result);
    });
}

fn refuse(waiting: Vec<PendingJoin>, refusal: Refusal) {
    for join in waiting {
        let _ = join.respond_to.send(Err(refusal.into()));
    }
}
