//! `RoomActor` - single writer for one room.
//!
//! Each `RoomActor`:
//! - Owns the room's media router, its peers and their resource maps
//! - Holds the screen-share token
//! - Observes router closure events and reconciles peer maps with them
//! - Runs the media broker (`broker.rs`) and disconnect cleanup (`cleanup.rs`)
//!
//! Every mutation of a room happens inside this actor, so check-then-set
//! sequences such as screen-share arbitration need no further locking.
//!
//! # Room Lifetime
//!
//! When the last peer leaves, the room sends an idle notice to the registry.
//! The registry answers with `CloseIfEmpty`; if no join was queued in the
//! meantime the room releases its router and stops.

use crate::config::{Config, RecvTransportPolicy};
use crate::errors::CoordinatorError;
use crate::media::{
    default_codecs, AppData, Direction, MediaError, MediaEvent, MediaEventReceiver, MediaKind,
    MediaRouter, RtpCapabilities, RtpCodec,
};
use crate::observability::metrics;
use crate::protocol::{ConsumeAck, CreateTransportAck, JoinRoomAck, ProducerInfo, ServerEvent};
use crate::sink::EventSink;

use super::messages::{Reply, RoomMessage, RoomState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::peer::PeerSession;
use super::screen_share::ScreenShareArbiter;

use common::types::{PeerId, RoomId};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Settings shared by every room.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    /// Deadline for each media engine call.
    pub media_timeout: Duration,
    /// Maximum concurrently live rooms (enforced by the registry).
    pub max_rooms: usize,
    pub max_peers_per_room: usize,
    pub recv_transport_policy: RecvTransportPolicy,
    pub listen_ip: String,
    pub announced_ip: String,
    /// Codecs each room router is created with.
    pub codecs: Vec<RtpCodec>,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            media_timeout: Duration::from_millis(crate::config::DEFAULT_MEDIA_TIMEOUT_MS),
            max_rooms: crate::config::DEFAULT_MAX_ROOMS,
            max_peers_per_room: crate::config::DEFAULT_MAX_PEERS_PER_ROOM,
            recv_transport_policy: RecvTransportPolicy::default(),
            listen_ip: crate::config::DEFAULT_LISTEN_IP.to_string(),
            announced_ip: crate::config::DEFAULT_ANNOUNCED_IP.to_string(),
            codecs: default_codecs(),
        }
    }
}

impl RoomSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            media_timeout: config.media_timeout,
            max_rooms: config.max_rooms,
            max_peers_per_room: config.max_peers_per_room,
            recv_transport_policy: config.recv_transport_policy,
            listen_ip: config.listen_ip.clone(),
            announced_ip: config.announced_ip.clone(),
            codecs: default_codecs(),
        }
    }
}

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// A handle with no actor behind it; the caller owns the mailbox.
    #[cfg(test)]
    pub(super) fn detached(
        room_id: RoomId,
    ) -> (Self, mpsc::Receiver<RoomMessage>, CancellationToken) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let handle = Self {
            sender,
            cancel_token: cancel_token.clone(),
            room_id,
        };
        (handle, receiver, cancel_token)
    }

    /// Send a request and wait for the reply. A closed mailbox means the room is gone.
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> RoomMessage,
    ) -> Result<T, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| CoordinatorError::RoomNotFound(self.room_id.to_string()))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))?
    }

    /// Queue a join without waiting for it. The registry uses this so the join
    /// is ordered before any later `CloseIfEmpty`.
    pub(super) async fn enqueue_join(
        &self,
        peer_id: PeerId,
        user_metadata: Value,
        sink: EventSink,
    ) -> Result<oneshot::Receiver<Result<JoinRoomAck, CoordinatorError>>, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                peer_id,
                user_metadata,
                sink,
                respond_to: tx,
            })
            .await
            .map_err(|_| CoordinatorError::RoomNotFound(self.room_id.to_string()))?;
        Ok(rx)
    }

    pub async fn create_transport(
        &self,
        peer_id: PeerId,
        direction: Direction,
    ) -> Result<CreateTransportAck, CoordinatorError> {
        self.request(|respond_to| RoomMessage::CreateTransport {
            peer_id,
            direction,
            respond_to,
        })
        .await
    }

    pub async fn connect_transport(
        &self,
        peer_id: PeerId,
        transport_id: String,
        remote_parameters: Value,
    ) -> Result<(), CoordinatorError> {
        self.request(|respond_to| RoomMessage::ConnectTransport {
            peer_id,
            transport_id,
            remote_parameters,
            respond_to,
        })
        .await
    }

    /// Returns the new producer's id.
    pub async fn produce(
        &self,
        peer_id: PeerId,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: AppData,
    ) -> Result<String, CoordinatorError> {
        self.request(|respond_to| RoomMessage::Produce {
            peer_id,
            transport_id,
            kind,
            rtp_parameters,
            app_data,
            respond_to,
        })
        .await
    }

    pub async fn consume(
        &self,
        peer_id: PeerId,
        producer_id: String,
        capabilities: RtpCapabilities,
    ) -> Result<ConsumeAck, CoordinatorError> {
        self.request(|respond_to| RoomMessage::Consume {
            peer_id,
            producer_id,
            capabilities,
            respond_to,
        })
        .await
    }

    pub async fn resume_consumer(
        &self,
        peer_id: PeerId,
        consumer_id: String,
    ) -> Result<(), CoordinatorError> {
        self.request(|respond_to| RoomMessage::ResumeConsumer {
            peer_id,
            consumer_id,
            respond_to,
        })
        .await
    }

    /// Returns whether the peer held the token.
    pub async fn stop_screen_share(&self, peer_id: PeerId) -> Result<bool, CoordinatorError> {
        self.request(|respond_to| RoomMessage::StopScreenShare {
            peer_id,
            respond_to,
        })
        .await
    }

    /// Reclaim everything the peer owns. Safe to call repeatedly.
    pub async fn disconnect(&self, peer_id: PeerId) -> Result<(), CoordinatorError> {
        self.request(|respond_to| RoomMessage::Disconnect {
            peer_id,
            respond_to,
        })
        .await
    }

    pub async fn get_state(&self) -> Result<RoomState, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| CoordinatorError::RoomNotFound(self.room_id.to_string()))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Returns true if the room was empty and has stopped.
    pub(super) async fn close_if_empty(&self) -> Result<bool, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RoomMessage::CloseIfEmpty { respond_to: tx })
            .await
            .is_err()
        {
            // Already stopped.
            return Ok(true);
        }

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Close the room; peers receive `room-closed`.
    pub(super) async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(RoomMessage::Close { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    pub(super) room_id: RoomId,
    receiver: mpsc::Receiver<RoomMessage>,
    media_events: MediaEventReceiver,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    pub(super) router: Box<dyn MediaRouter>,
    pub(super) settings: Arc<RoomSettings>,
    pub(super) peers: HashMap<PeerId, PeerSession>,
    pub(super) arbiter: ScreenShareArbiter,
    /// Idle notices to the registry.
    idle_tx: mpsc::UnboundedSender<RoomId>,
    pub(super) metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a room actor around an already created router.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: RoomId,
        router: Box<dyn MediaRouter>,
        media_events: MediaEventReceiver,
        settings: Arc<RoomSettings>,
        idle_tx: mpsc::UnboundedSender<RoomId>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            media_events,
            cancel_token: cancel_token.clone(),
            router,
            settings,
            peers: HashMap::new(),
            arbiter: ScreenShareArbiter::new(),
            idle_tx,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.as_str()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rtc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "rtc.actor.room",
            room_id = %self.room_id,
            router_id = %self.router.id(),
            "RoomActor started"
        );

        loop {
            // Closure events are reconciled before the next request is served.
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rtc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.close_room().await;
                    break;
                }

                Some(event) = self.media_events.recv() => {
                    self.handle_media_event(event);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.message_received();
                            let stop = self.handle_message(message).await;
                            self.mailbox.message_handled();
                            self.metrics.record_message_processed();

                            if stop {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "rtc.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.close_room().await;
                            break;
                        }
                    }
                }
            }
        }

        // Requests queued behind the final message see a gone room.
        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            message.reject(&self.room_id);
        }

        info!(
            target: "rtc.actor.room",
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should stop.
    async fn handle_message(&mut self, message: RoomMessage) -> bool {
        match message {
            RoomMessage::Join {
                peer_id,
                user_metadata,
                sink,
                respond_to,
            } => {
                let result = self.handle_join(peer_id, user_metadata, sink);
                let _ = respond_to.send(result);
            }

            RoomMessage::CreateTransport {
                peer_id,
                direction,
                respond_to,
            } => {
                let result = self.create_transport(peer_id, direction).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ConnectTransport {
                peer_id,
                transport_id,
                remote_parameters,
                respond_to,
            } => {
                let result = self
                    .connect_transport(peer_id, &transport_id, &remote_parameters)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Produce {
                peer_id,
                transport_id,
                kind,
                rtp_parameters,
                app_data,
                respond_to,
            } => {
                let result = self
                    .produce(peer_id, transport_id, kind, rtp_parameters, app_data)
                    .await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Consume {
                peer_id,
                producer_id,
                capabilities,
                respond_to,
            } => {
                let result = self.consume(peer_id, producer_id, &capabilities).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::ResumeConsumer {
                peer_id,
                consumer_id,
                respond_to,
            } => {
                let result = self.resume_consumer(peer_id, &consumer_id).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::StopScreenShare {
                peer_id,
                respond_to,
            } => {
                let result = self.stop_screen_share(peer_id).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Disconnect {
                peer_id,
                respond_to,
            } => {
                self.handle_disconnect(peer_id).await;
                let _ = respond_to.send(Ok(()));
            }

            RoomMessage::CloseIfEmpty { respond_to } => {
                if self.peers.is_empty() {
                    self.close_router().await;
                    let _ = respond_to.send(true);
                    return true;
                }
                let _ = respond_to.send(false);
            }

            RoomMessage::Close { respond_to } => {
                self.close_room().await;
                let _ = respond_to.send(());
                return true;
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
        false
    }

    /// Add a peer to the room.
    fn handle_join(
        &mut self,
        peer_id: PeerId,
        user_metadata: Value,
        sink: EventSink,
    ) -> Result<JoinRoomAck, CoordinatorError> {
        if self.peers.contains_key(&peer_id) {
            return Err(CoordinatorError::Conflict("already joined".to_string()));
        }
        if self.peers.len() >= self.settings.max_peers_per_room {
            if self.peers.is_empty() {
                self.notify_idle();
            }
            return Err(CoordinatorError::Conflict("room is full".to_string()));
        }

        let existing_peer_ids: Vec<PeerId> = self.peers.keys().copied().collect();
        let existing_producers: Vec<ProducerInfo> = self
            .peers
            .values()
            .flat_map(|peer| {
                peer.producers.iter().map(|(producer_id, entry)| ProducerInfo {
                    peer_id: peer.peer_id,
                    producer_id: producer_id.clone(),
                    kind: entry.kind,
                    app_data: entry.app_data.clone(),
                })
            })
            .collect();

        self.broadcast(
            None,
            &ServerEvent::PeerJoined {
                peer_id,
                user_metadata: user_metadata.clone(),
            },
        );

        self.peers
            .insert(peer_id, PeerSession::new(peer_id, user_metadata, sink));
        self.metrics.peer_joined();

        info!(
            target: "rtc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            total_peers = self.peers.len(),
            "Peer joined"
        );

        Ok(JoinRoomAck {
            peer_id,
            routing_capabilities: self.router.rtp_capabilities(),
            existing_peer_ids,
            existing_producers,
            screen_sharing_peer: self.arbiter.holder(),
        })
    }

    fn get_state(&self) -> RoomState {
        let (transport_count, producer_count, consumer_count) = self.peers.values().fold(
            (0, 0, 0),
            |(t, p, c), peer| {
                let (pt, pp, pc) = peer.resource_counts();
                (t + pt, p + pp, c + pc)
            },
        );

        let mut peer_ids: Vec<PeerId> = self.peers.keys().copied().collect();
        peer_ids.sort();

        RoomState {
            room_id: self.room_id.clone(),
            router_id: self.router.id().to_string(),
            peer_ids,
            screen_share_holder: self.arbiter.holder(),
            transport_count,
            producer_count,
            consumer_count,
        }
    }

    /// Reconcile peer maps with a closure reported by the router.
    fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::TransportClosed { transport_id } => {
                let owner = self.owner_of(|peer| peer.transports.contains_key(&transport_id));
                if let Some(peer) = owner.and_then(|id| self.peers.get_mut(&id)) {
                    let orphaned = peer.take_transport(&transport_id);
                    debug!(
                        target: "rtc.actor.room",
                        room_id = %self.room_id,
                        transport_id = %transport_id,
                        orphaned_consumers = orphaned.len(),
                        "Transport closed"
                    );
                }
                if let Some(peer_id) = owner {
                    self.release_if_not_sharing(peer_id);
                }
            }

            MediaEvent::ProducerClosed { producer_id } => {
                let owner = self.owner_of(|peer| peer.producers.contains_key(&producer_id));
                if let Some(peer_id) = owner {
                    if let Some(peer) = self.peers.get_mut(&peer_id) {
                        peer.producers.remove(&producer_id);
                    }
                    self.release_if_not_sharing(peer_id);
                }
            }

            MediaEvent::ConsumerClosed { consumer_id } => {
                if let Some(peer) = self
                    .peers
                    .values_mut()
                    .find(|peer| peer.consumers.contains_key(&consumer_id))
                {
                    peer.take_consumer(&consumer_id);
                }
            }

            MediaEvent::ConsumerProducerClosed {
                consumer_id,
                producer_id,
            } => {
                if let Some(peer) = self
                    .peers
                    .values_mut()
                    .find(|peer| peer.consumers.contains_key(&consumer_id))
                {
                    peer.take_consumer(&consumer_id);
                    peer.sink.deliver(ServerEvent::ConsumerClosed {
                        consumer_id,
                        producer_id,
                    });
                }
            }
        }
    }

    fn owner_of(&self, owns: impl Fn(&PeerSession) -> bool) -> Option<PeerId> {
        self.peers
            .values()
            .find(|peer| owns(peer))
            .map(|peer| peer.peer_id)
    }

    /// Release the token if the peer holds it without a live screen producer.
    fn release_if_not_sharing(&mut self, peer_id: PeerId) {
        let still_sharing = self
            .peers
            .get(&peer_id)
            .is_some_and(PeerSession::has_screen_producer);
        if !still_sharing {
            self.release_screen_share(peer_id);
        }
    }

    /// Release the screen-share token held by `peer_id` and tell the room.
    pub(super) fn release_screen_share(&mut self, peer_id: PeerId) {
        if self.arbiter.release(peer_id) {
            info!(
                target: "rtc.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "Screen share stopped"
            );
            self.broadcast(None, &ServerEvent::ScreenShareStopped { peer_id });
        }
    }

    /// Deliver an event to every peer except `except`.
    pub(super) fn broadcast(&self, except: Option<PeerId>, event: &ServerEvent) {
        for peer in self.peers.values() {
            if Some(peer.peer_id) != except {
                peer.sink.deliver(event.clone());
            }
        }
    }

    pub(super) fn notify_idle(&self) {
        // Registry gone means shutdown is under way.
        let _ = self.idle_tx.send(self.room_id.clone());
    }

    /// Run a media engine call under the configured deadline.
    pub(super) async fn media_call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, MediaError>>,
    ) -> Result<T, CoordinatorError> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.settings.media_timeout, call).await;
        metrics::record_media_latency(operation, start.elapsed());

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(
                    target: "rtc.media",
                    room_id = %self.room_id,
                    operation,
                    error = %e,
                    "Media engine call failed"
                );
                Err(e.into())
            }
            Err(_) => {
                warn!(
                    target: "rtc.media",
                    room_id = %self.room_id,
                    operation,
                    "Media engine call timed out"
                );
                Err(CoordinatorError::Timeout(operation.to_string()))
            }
        }
    }

    async fn close_router(&self) {
        if tokio::time::timeout(self.settings.media_timeout, self.router.close())
            .await
            .is_err()
        {
            warn!(
                target: "rtc.media",
                room_id = %self.room_id,
                "Router close timed out"
            );
        }
    }

    /// Close the room regardless of membership.
    async fn close_room(&mut self) {
        self.broadcast(
            None,
            &ServerEvent::RoomClosed {
                room_id: self.room_id.clone(),
            },
        );

        for _ in self.peers.drain() {
            self.metrics.peer_left();
        }
        self.arbiter = ScreenShareArbiter::new();
        self.close_router().await;

        info!(
            target: "rtc.actor.room",
            room_id = %self.room_id,
            "Room closed"
        );
    }
}
