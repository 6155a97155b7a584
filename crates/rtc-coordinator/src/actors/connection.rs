//! `ConnectionActor` - one per client connection.
//!
//! Each `ConnectionActor`:
//! - Owns the Peer Session lifecycle (Unjoined -> Joined -> Closed)
//! - Handles inbound requests strictly in arrival order
//! - Forwards media requests to the room it joined and chat requests to the
//!   chat service
//! - Writes acknowledgements to the connection's outbound queue
//!
//! # Lifecycle
//!
//! 1. Spawned by the gateway when a socket is accepted (Unjoined)
//! 2. `join-room` moves it to Joined; a room that has since closed moves it
//!    back to Unjoined on the next request
//! 3. Socket close, `disconnect` or cancellation runs cleanup once and moves
//!    it to Closed

use crate::chat::ChatService;
use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::protocol::{
    to_ack_value, ClientEvent, ClientFrame, ProduceAck, ServerEvent, ServerFrame,
    StopScreenShareAck, SuccessAck,
};
use crate::sink::EventSink;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::RoomRegistryHandle;
use super::room::RoomActorHandle;

use common::types::PeerId;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 64;

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    peer_id: PeerId,
}

impl ConnectionActorHandle {
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Queue a validated frame. Its acknowledgement goes to the outbound queue.
    pub async fn request(&self, frame: ClientFrame) -> Result<(), CoordinatorError> {
        self.sender
            .send(ConnectionMessage::Request { frame })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))
    }

    /// Report that the socket closed and wait for cleanup to finish.
    pub async fn closed(&self) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ConnectionMessage::Closed { respond_to: tx })
            .await
            .map_err(|e| CoordinatorError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CoordinatorError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Peer Session lifecycle.
#[derive(Debug)]
enum SessionState {
    Unjoined,
    Joined { room: RoomActorHandle },
    Closed,
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    peer_id: PeerId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    sink: EventSink,
    registry: RoomRegistryHandle,
    chat: Arc<ChatService>,
    state: SessionState,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        peer_id: PeerId,
        sink: EventSink,
        registry: RoomRegistryHandle,
        chat: Arc<ChatService>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);
        metrics.connection_created();

        let actor = Self {
            peer_id,
            receiver,
            cancel_token: cancel_token.clone(),
            sink,
            registry,
            chat,
            state: SessionState::Unjoined,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, peer_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            peer_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rtc.actor.connection", fields(peer_id = %self.peer_id))]
    async fn run(mut self) {
        debug!(
            target: "rtc.actor.connection",
            peer_id = %self.peer_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rtc.actor.connection",
                        peer_id = %self.peer_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.cleanup().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(ConnectionMessage::Request { frame }) => {
                            self.mailbox.message_received();
                            self.handle_request(frame).await;
                            self.mailbox.message_handled();
                            self.metrics.record_message_processed();
                        }
                        Some(ConnectionMessage::Closed { respond_to }) => {
                            self.cleanup().await;
                            let _ = respond_to.send(());
                            break;
                        }
                        None => {
                            debug!(
                                target: "rtc.actor.connection",
                                peer_id = %self.peer_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            self.cleanup().await;
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        info!(
            target: "rtc.actor.connection",
            peer_id = %self.peer_id,
            messages_processed = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Dispatch one frame and write its acknowledgement.
    async fn handle_request(&mut self, frame: ClientFrame) {
        let ClientFrame { id, event } = frame;
        let name = event.name();
        let message_group = match &event {
            ClientEvent::Message(request) => Some(request.room_name.clone()),
            _ => None,
        };

        let start = Instant::now();
        let result = self.dispatch(event).await;
        metrics::record_request(
            name,
            result.as_ref().err().map(CoordinatorError::error_type_label),
            start.elapsed(),
        );

        if let Err(e) = &result {
            debug!(
                target: "rtc.actor.connection",
                peer_id = %self.peer_id,
                event = name,
                error = %e,
                "Request failed"
            );
        }

        match (id, result) {
            (Some(id), result) => {
                self.sink.deliver_ack(ServerFrame::ack(id, result)).await;
            }
            (None, Ok(_)) => {}
            (None, Err(e)) => {
                let event = match message_group {
                    Some(room_name) => ServerEvent::MessageError {
                        room_name,
                        error: e.to_payload(),
                    },
                    None => ServerEvent::Error(e.to_payload()),
                };
                self.sink.deliver(event);
            }
        }
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Result<Value, CoordinatorError> {
        if matches!(self.state, SessionState::Closed) && !matches!(event, ClientEvent::Disconnect(_)) {
            return Err(CoordinatorError::PeerNotFound);
        }

        match event {
            ClientEvent::JoinRoom(request) => {
                if matches!(self.state, SessionState::Joined { .. }) {
                    return Err(CoordinatorError::Conflict("already joined".to_string()));
                }
                let (room, ack) = self
                    .registry
                    .join_room(
                        request.room_id,
                        self.peer_id,
                        request.user_metadata,
                        self.sink.clone(),
                    )
                    .await?;
                info!(
                    target: "rtc.actor.connection",
                    peer_id = %self.peer_id,
                    room_id = %room.room_id(),
                    "Joined room"
                );
                self.state = SessionState::Joined { room };
                to_ack_value(&ack)
            }

            ClientEvent::CreateTransport(request) => {
                let room = self.room()?;
                let ack = self
                    .in_room(room.create_transport(self.peer_id, request.direction).await)?;
                to_ack_value(&ack)
            }

            ClientEvent::ConnectTransport(request) => {
                let room = self.room()?;
                self.in_room(
                    room.connect_transport(
                        self.peer_id,
                        request.transport_id,
                        request.remote_parameters,
                    )
                    .await,
                )?;
                to_ack_value(&SuccessAck::OK)
            }

            ClientEvent::Produce(request) => {
                let room = self.room()?;
                let producer_id = self.in_room(
                    room.produce(
                        self.peer_id,
                        request.transport_id,
                        request.kind,
                        request.media_parameters,
                        request.app_data,
                    )
                    .await,
                )?;
                to_ack_value(&ProduceAck { producer_id })
            }

            ClientEvent::Consume(request) => {
                let room = self.room()?;
                let ack = self.in_room(
                    room.consume(self.peer_id, request.producer_id, request.remote_capabilities)
                        .await,
                )?;
                to_ack_value(&ack)
            }

            ClientEvent::ResumeConsumer(request) => {
                let room = self.room()?;
                self.in_room(room.resume_consumer(self.peer_id, request.consumer_id).await)?;
                to_ack_value(&SuccessAck::OK)
            }

            ClientEvent::StopScreenShare(_) => {
                let room = self.room()?;
                let stopped = self.in_room(room.stop_screen_share(self.peer_id).await)?;
                to_ack_value(&StopScreenShareAck { stopped })
            }

            ClientEvent::JoinGroup(request) => {
                self.chat
                    .join_group(&request.room_name, self.sink.clone())
                    .await?;
                to_ack_value(&SuccessAck::OK)
            }

            ClientEvent::Message(request) => {
                let ack = self.chat.send_message(request).await?;
                to_ack_value(&ack)
            }

            ClientEvent::MessageDelete(request) => {
                self.chat
                    .delete_message(&request.id, &request.room_name)
                    .await?;
                to_ack_value(&SuccessAck::OK)
            }

            ClientEvent::SendNotification(request) => {
                let ack = self.chat.send_notification(request).await?;
                to_ack_value(&ack)
            }

            ClientEvent::MarkRead(request) => {
                self.chat.mark_read(&request.id).await?;
                to_ack_value(&SuccessAck::OK)
            }

            ClientEvent::JoinUserChannel(request) => {
                self.chat
                    .join_user_channel(&request.user_id, self.sink.clone())
                    .await;
                to_ack_value(&SuccessAck::OK)
            }

            ClientEvent::Disconnect(_) => {
                self.cleanup().await;
                to_ack_value(&SuccessAck::OK)
            }
        }
    }

    /// The joined room, or `PeerNotFound` when not in one.
    fn room(&self) -> Result<RoomActorHandle, CoordinatorError> {
        match &self.state {
            SessionState::Joined { room } => Ok(room.clone()),
            SessionState::Unjoined | SessionState::Closed => Err(CoordinatorError::PeerNotFound),
        }
    }

    /// Fall back to Unjoined when the room has gone away underneath us.
    fn in_room<T>(&mut self, result: Result<T, CoordinatorError>) -> Result<T, CoordinatorError> {
        if let Err(CoordinatorError::RoomNotFound(room_id)) = &result {
            debug!(
                target: "rtc.actor.connection",
                peer_id = %self.peer_id,
                room_id = %room_id,
                "Room closed, session is unjoined"
            );
            self.state = SessionState::Unjoined;
        }
        result
    }

    /// Leave the room and drop chat subscriptions. Runs at most once.
    async fn cleanup(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if matches!(previous, SessionState::Closed) {
            return;
        }

        if let SessionState::Joined { room } = previous {
            match room.disconnect(self.peer_id).await {
                Ok(()) | Err(CoordinatorError::RoomNotFound(_)) => {}
                Err(e) => {
                    warn!(
                        target: "rtc.actor.connection",
                        peer_id = %self.peer_id,
                        room_id = %room.room_id(),
                        error = %e,
                        "Room cleanup failed"
                    );
                }
            }
        }

        self.chat.disconnect(self.peer_id).await;

        debug!(
            target: "rtc.actor.connection",
            peer_id = %self.peer_id,
            "Peer session closed"
        );
    }
}
