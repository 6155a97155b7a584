//! Versioned wire protocol.
//!
//! Client frames are JSON text frames:
//!
//! ```json
//! {"v": 1, "id": 7, "event": "produce", "data": {"transportId": "...", "kind": "video"}}
//! ```
//!
//! `id` is optional; when present the server answers with exactly one
//! acknowledgement carrying the same id, either `{"ack": 7, "ok": {...}}` or
//! `{"ack": 7, "error": {"code": 4, "message": "..."}}`. Server-initiated
//! events are `{"event": "<name>", "data": {...}}`.
//!
//! Every inbound event is a closed variant of [`ClientEvent`]; anything that
//! fails to decode is rejected at the gateway with `INVALID_PAYLOAD` before it
//! reaches the actors.

use crate::chat::models::{ChatMessage, MessageKind, Notification, NotificationKind};
use crate::errors::{CoordinatorError, ErrorPayload};
use crate::media::{
    AppData, Direction, MediaKind, RtpCapabilities, TransportParams,
};
use chrono::{DateTime, Utc};
use common::types::{PeerId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Envelope of an inbound frame, before the event payload is validated.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default = "default_version")]
    v: u32,
    #[serde(default)]
    id: Option<u64>,
    event: String,
    #[serde(default)]
    data: Value,
}

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

/// A validated inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientFrame {
    pub id: Option<u64>,
    pub event: ClientEvent,
}

/// Why an inbound frame was rejected. Carries the request id when it could be read.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameError {
    pub id: Option<u64>,
    pub reason: String,
}

impl FrameError {
    #[must_use]
    pub fn into_error(self) -> CoordinatorError {
        CoordinatorError::InvalidPayload(self.reason)
    }
}

impl ClientFrame {
    /// Parse and validate a text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame = serde_json::from_str(text).map_err(|e| FrameError {
            id: None,
            reason: format!("malformed frame: {e}"),
        })?;

        if raw.v != PROTOCOL_VERSION {
            return Err(FrameError {
                id: raw.id,
                reason: format!(
                    "unsupported protocol version {} (expected {PROTOCOL_VERSION})",
                    raw.v
                ),
            });
        }

        // Events without a payload may omit `data` or send null.
        let data = if raw.data.is_null() {
            Value::Object(Map::new())
        } else {
            raw.data
        };

        let mut tagged = Map::new();
        tagged.insert("event".to_string(), Value::String(raw.event.clone()));
        tagged.insert("data".to_string(), data);

        let event: ClientEvent =
            serde_json::from_value(Value::Object(tagged)).map_err(|e| FrameError {
                id: raw.id,
                reason: format!("invalid '{}' payload: {e}", raw.event),
            })?;

        Ok(Self { id: raw.id, event })
    }
}

/// Inbound session events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom(JoinRoomRequest),
    CreateTransport(CreateTransportRequest),
    ConnectTransport(ConnectTransportRequest),
    Produce(ProduceRequest),
    Consume(ConsumeRequest),
    ResumeConsumer(ResumeConsumerRequest),
    StopScreenShare(EmptyRequest),
    JoinGroup(JoinGroupRequest),
    Message(SendMessageRequest),
    MessageDelete(DeleteMessageRequest),
    SendNotification(SendNotificationRequest),
    MarkRead(MarkReadRequest),
    JoinUserChannel(JoinUserChannelRequest),
    Disconnect(EmptyRequest),
}

impl ClientEvent {
    /// Wire name, also used as the bounded `event` metric label.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join-room",
            ClientEvent::CreateTransport(_) => "create-transport",
            ClientEvent::ConnectTransport(_) => "connect-transport",
            ClientEvent::Produce(_) => "produce",
            ClientEvent::Consume(_) => "consume",
            ClientEvent::ResumeConsumer(_) => "resume-consumer",
            ClientEvent::StopScreenShare(_) => "stop-screen-share",
            ClientEvent::JoinGroup(_) => "join-group",
            ClientEvent::Message(_) => "message",
            ClientEvent::MessageDelete(_) => "message-delete",
            ClientEvent::SendNotification(_) => "send-notification",
            ClientEvent::MarkRead(_) => "mark-read",
            ClientEvent::JoinUserChannel(_) => "join-user-channel",
            ClientEvent::Disconnect(_) => "disconnect",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EmptyRequest {}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_id: RoomId,
    #[serde(default, alias = "userData")]
    pub user_metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: String,
    #[serde(alias = "dtlsParameters")]
    pub remote_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub transport_id: String,
    pub kind: MediaKind,
    #[serde(alias = "rtpParameters")]
    pub media_parameters: Value,
    #[serde(default)]
    pub app_data: AppData,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub producer_id: String,
    #[serde(alias = "rtpCapabilities")]
    pub remote_capabilities: RtpCapabilities,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConsumerRequest {
    pub consumer_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGroupRequest {
    #[serde(alias = "group")]
    pub room_name: String,
}

/// Sender identity as the client presents it. Only `id` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderInfo {
    #[serde(alias = "_id")]
    pub id: UserId,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(alias = "group")]
    pub room_name: String,
    #[serde(alias = "user")]
    pub sender_info: SenderInfo,
    #[serde(alias = "message")]
    pub text: String,
    #[serde(default)]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageRequest {
    pub id: String,
    #[serde(alias = "group")]
    pub room_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendNotificationRequest {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    #[serde(alias = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinUserChannelRequest {
    pub user_id: UserId,
}

// ============================================================================
// Acknowledgement payloads
// ============================================================================

/// A producer already live in a room when a peer joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub peer_id: PeerId,
    pub producer_id: String,
    pub kind: MediaKind,
    pub app_data: AppData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomAck {
    pub peer_id: PeerId,
    pub routing_capabilities: RtpCapabilities,
    pub existing_peer_ids: Vec<PeerId>,
    pub existing_producers: Vec<ProducerInfo>,
    pub screen_sharing_peer: Option<PeerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportAck {
    pub id: String,
    pub connection_parameters: TransportParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessAck {
    pub success: bool,
}

impl SuccessAck {
    pub const OK: SuccessAck = SuccessAck { success: true };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceAck {
    pub producer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeAck {
    pub consumer_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub media_parameters: Value,
    pub app_data: AppData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopScreenShareAck {
    /// Whether the caller held the token.
    pub stopped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAck {
    pub id: String,
}

// ============================================================================
// Server frames
// ============================================================================

/// Outbound broadcast and notice events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        peer_id: PeerId,
        user_metadata: Value,
    },
    #[serde(rename_all = "camelCase")]
    PeerLeft { peer_id: PeerId },
    #[serde(rename_all = "camelCase")]
    NewProducer {
        peer_id: PeerId,
        producer_id: String,
        kind: MediaKind,
        app_data: AppData,
    },
    #[serde(rename_all = "camelCase")]
    ScreenShareStarted { peer_id: PeerId },
    #[serde(rename_all = "camelCase")]
    ScreenShareStopped { peer_id: PeerId },
    #[serde(rename_all = "camelCase")]
    ConsumerClosed {
        consumer_id: String,
        producer_id: String,
    },
    #[serde(rename_all = "camelCase")]
    MessageReceived {
        id: String,
        room_name: String,
        text: String,
        sender: SenderInfo,
        kind: MessageKind,
        created_at: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    MessageDeleted { id: String },
    #[serde(rename_all = "camelCase")]
    NotificationReceived { notification: Notification },
    #[serde(rename_all = "camelCase")]
    RoomClosed { room_id: RoomId },
    /// Sent only to the sender when a chat send without an ack id fails.
    #[serde(rename_all = "camelCase")]
    MessageError { room_name: String, error: ErrorPayload },
    /// A frame without an ack id could not be processed.
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Build the `message-received` broadcast for a persisted message.
    #[must_use]
    pub fn message_received(message: &ChatMessage, room_name: &str, sender: SenderInfo) -> Self {
        ServerEvent::MessageReceived {
            id: message.id.clone(),
            room_name: room_name.to_string(),
            text: message.text.clone(),
            sender,
            kind: message.kind,
            created_at: message.created_at,
        }
    }
}

/// Result half of an acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckOutcome {
    Ok(Value),
    Error(ErrorPayload),
}

/// Every frame the server writes to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Ack {
        ack: u64,
        #[serde(flatten)]
        outcome: AckOutcome,
    },
    Event(ServerEvent),
}

impl ServerFrame {
    /// Acknowledge request `id` with the handler's result.
    #[must_use]
    pub fn ack(id: u64, result: Result<Value, CoordinatorError>) -> Self {
        let outcome = match result {
            Ok(value) => AckOutcome::Ok(value),
            Err(e) => AckOutcome::Error(e.to_payload()),
        };
        ServerFrame::Ack { ack: id, outcome }
    }

    /// Encode as a JSON text frame.
    pub fn to_text(&self) -> Result<String, CoordinatorError> {
        serde_json::to_string(self)
            .map_err(|e| CoordinatorError::Internal(format!("frame encoding failed: {e}")))
    }
}

/// Serialize an acknowledgement payload.
pub fn to_ack_value<T: Serialize>(payload: &T) -> Result<Value, CoordinatorError> {
    serde_json::to_value(payload)
        .map_err(|e| CoordinatorError::Internal(format!("ack encoding failed: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join_room() {
        let frame = ClientFrame::parse(
            r#"{"v":1,"id":3,"event":"join-room","data":{"roomId":"R1","userMetadata":{"name":"ada"}}}"#,
        )
        .unwrap();

        assert_eq!(frame.id, Some(3));
        match frame.event {
            ClientEvent::JoinRoom(req) => {
                assert_eq!(req.room_id, RoomId::new("R1"));
                assert_eq!(req.user_metadata, json!({"name": "ada"}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_accepts_media_field_aliases() {
        let frame = ClientFrame::parse(
            &json!({
                "event": "produce",
                "data": {
                    "transportId": "t1",
                    "kind": "video",
                    "rtpParameters": {"codecs": []},
                    "appData": {"screen": true}
                }
            })
            .to_string(),
        )
        .unwrap();

        match frame.event {
            ClientEvent::Produce(req) => {
                assert_eq!(req.transport_id, "t1");
                assert_eq!(req.kind, MediaKind::Video);
                assert!(req.app_data.is_screen);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_payloadless_events() {
        for text in [
            r#"{"event":"stop-screen-share"}"#,
            r#"{"event":"stop-screen-share","data":null}"#,
            r#"{"event":"disconnect","data":{}}"#,
        ] {
            assert!(ClientFrame::parse(text).is_ok(), "{text}");
        }
    }

    #[test]
    fn test_parse_rejects_unknown_event_with_id() {
        let err = ClientFrame::parse(r#"{"v":1,"id":9,"event":"teleport","data":{}}"#).unwrap_err();
        assert_eq!(err.id, Some(9));
        assert_eq!(err.into_error().error_code(), 1);
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let err =
            ClientFrame::parse(r#"{"id":1,"event":"create-transport","data":{}}"#).unwrap_err();
        assert_eq!(err.id, Some(1));
        assert!(err.reason.contains("direction"));
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        let err = ClientFrame::parse(r#"{"v":2,"id":4,"event":"disconnect"}"#).unwrap_err();
        assert_eq!(err.id, Some(4));
        assert!(err.reason.contains("version"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = ClientFrame::parse("not json").unwrap_err();
        assert_eq!(err.id, None);
    }

    #[test]
    fn test_ack_frame_shapes() {
        let ok = ServerFrame::ack(5, to_ack_value(&SuccessAck::OK));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"ack": 5, "ok": {"success": true}})
        );

        let err = ServerFrame::ack(6, Err(CoordinatorError::PeerNotFound));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"ack": 6, "error": {"code": 4, "message": "Peer not found"}})
        );
    }

    #[test]
    fn test_event_frame_shape_and_round_trip() {
        let peer_id = PeerId::new();
        let frame = ServerFrame::Event(ServerEvent::ScreenShareStopped { peer_id });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"event": "screen-share-stopped", "data": {"peerId": peer_id.to_string()}})
        );

        let back: ServerFrame = serde_json::from_value(value).unwrap();
        assert_eq!(back, frame);

        let ack: ServerFrame = serde_json::from_value(json!({"ack": 1, "ok": {}})).unwrap();
        assert!(matches!(ack, ServerFrame::Ack { ack: 1, .. }));
    }

    #[test]
    fn test_event_names_are_kebab_case() {
        let frame = ClientFrame::parse(
            r#"{"event":"join-user-channel","data":{"userId":"u-1"}}"#,
        )
        .unwrap();
        assert_eq!(frame.event.name(), "join-user-channel");
    }
}
