//! Message types for actor communication.
//!
//! Request-style messages carry a `respond_to` oneshot; the handle methods in
//! `registry`, `room` and `connection` wrap them into plain async calls.

use super::room::RoomActorHandle;
use crate::errors::CoordinatorError;
use crate::media::{AppData, Direction, MediaEngine, MediaKind, RtpCapabilities};
use crate::protocol::{ClientFrame, ConsumeAck, CreateTransportAck, JoinRoomAck};
use crate::sink::EventSink;
use common::types::{PeerId, RoomId};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Reply channel for request-style messages.
pub type Reply<T> = oneshot::Sender<Result<T, CoordinatorError>>;

/// Messages handled by the `RoomRegistryActor`.
pub enum RegistryMessage {
    /// Get-or-create the room and add the peer to it.
    JoinRoom {
        room_id: RoomId,
        peer_id: PeerId,
        user_metadata: Value,
        sink: EventSink,
        respond_to: Reply<(RoomActorHandle, JoinRoomAck)>,
    },

    /// Look up a live room.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Swap in a relaunched media worker. Every live room is closed first.
    ReplaceEngine {
        engine: Arc<dyn MediaEngine>,
        respond_to: oneshot::Sender<()>,
    },

    /// Stop accepting rooms and close the live ones.
    Shutdown { respond_to: Reply<()> },
}

/// Registry status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatus {
    pub active_rooms: usize,
    pub room_ids: Vec<RoomId>,
    pub is_draining: bool,
}

/// Messages handled by a `RoomActor`.
pub enum RoomMessage {
    Join {
        peer_id: PeerId,
        user_metadata: Value,
        sink: EventSink,
        respond_to: Reply<JoinRoomAck>,
    },

    CreateTransport {
        peer_id: PeerId,
        direction: Direction,
        respond_to: Reply<CreateTransportAck>,
    },

    ConnectTransport {
        peer_id: PeerId,
        transport_id: String,
        remote_parameters: Value,
        respond_to: Reply<()>,
    },

    Produce {
        peer_id: PeerId,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: AppData,
        respond_to: Reply<String>,
    },

    Consume {
        peer_id: PeerId,
        producer_id: String,
        capabilities: RtpCapabilities,
        respond_to: Reply<ConsumeAck>,
    },

    ResumeConsumer {
        peer_id: PeerId,
        consumer_id: String,
        respond_to: Reply<()>,
    },

    /// Replies whether the peer held the screen-share token.
    StopScreenShare {
        peer_id: PeerId,
        respond_to: Reply<bool>,
    },

    /// Reclaim everything the peer owns. Idempotent.
    Disconnect {
        peer_id: PeerId,
        respond_to: Reply<()>,
    },

    /// Sent by the registry after an idle notice. Replies true and stops if the
    /// room is still empty.
    CloseIfEmpty { respond_to: oneshot::Sender<bool> },

    /// Close the room regardless of membership; peers receive `room-closed`.
    Close { respond_to: oneshot::Sender<()> },

    GetState { respond_to: oneshot::Sender<RoomState> },
}

impl RoomMessage {
    /// Fail a request that reached a room after it stopped.
    pub fn reject(self, room_id: &RoomId) {
        let gone = || CoordinatorError::RoomNotFound(room_id.to_string());
        match self {
            RoomMessage::Join { respond_to, .. } => {
                let _ = respond_to.send(Err(gone()));
            }
            RoomMessage::CreateTransport { respond_to, .. } => {
                let _ = respond_to.send(Err(gone()));
            }
            RoomMessage::ConnectTransport { respond_to, .. }
            | RoomMessage::ResumeConsumer { respond_to, .. }
            | RoomMessage::Disconnect { respond_to, .. } => {
                let _ = respond_to.send(Err(gone()));
            }
            RoomMessage::Produce { respond_to, .. } => {
                let _ = respond_to.send(Err(gone()));
            }
            RoomMessage::Consume { respond_to, .. } => {
                let _ = respond_to.send(Err(gone()));
            }
            RoomMessage::StopScreenShare { respond_to, .. } => {
                let _ = respond_to.send(Err(gone()));
            }
            RoomMessage::CloseIfEmpty { respond_to } => {
                let _ = respond_to.send(true);
            }
            RoomMessage::Close { respond_to } => {
                let _ = respond_to.send(());
            }
            // Dropping the sender surfaces as a receive failure to the caller.
            RoomMessage::GetState { .. } => {}
        }
    }
}

/// Room state snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub room_id: RoomId,
    pub router_id: String,
    pub peer_ids: Vec<PeerId>,
    pub screen_share_holder: Option<PeerId>,
    pub transport_count: usize,
    pub producer_count: usize,
    pub consumer_count: usize,
}

/// Messages handled by a `ConnectionActor`.
pub enum ConnectionMessage {
    /// A validated inbound frame, handled in arrival order.
    Request { frame: ClientFrame },

    /// The socket closed. Runs cleanup and stops the actor.
    Closed { respond_to: oneshot::Sender<()> },
}
