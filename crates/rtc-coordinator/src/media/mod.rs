//! Media Engine Capability contract.
//!
//! The coordinator never touches RTP, ICE or DTLS itself. It drives an engine
//! through [`MediaEngine`] (one worker per process) and [`MediaRouter`] (one
//! routing handle per room), and treats every parameter blob the engine hands
//! back as opaque JSON.
//!
//! Closure is reported asynchronously: the router pushes [`MediaEvent`]s onto
//! the channel supplied at creation so the owning room can drop stale entries
//! from its peer maps.

pub mod local;
pub mod supervisor;

use crate::errors::CoordinatorError;
use async_trait::async_trait;
use common::types::RoomId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

pub use local::{LocalEngineLauncher, LocalMediaEngine};
pub use supervisor::{EngineLauncher, SupervisorOutcome, WorkerSupervisor};

/// Kind of a media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

/// Direction of a transport, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Recv,
}

impl Direction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Send => "send",
            Direction::Recv => "recv",
        }
    }
}

/// A codec a router can route or an endpoint can decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodec {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
}

/// A set of codecs (router capabilities or a remote endpoint's receive capabilities).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header_extensions: Vec<Value>,
}

impl RtpCapabilities {
    /// Whether any codec of `kind` with the same MIME type is present in both sets.
    #[must_use]
    pub fn shares_codec(&self, other: &RtpCapabilities, kind: MediaKind) -> bool {
        self.codecs
            .iter()
            .filter(|c| c.kind == kind)
            .any(|ours| {
                other.codecs.iter().any(|theirs| {
                    theirs.kind == kind && theirs.mime_type.eq_ignore_ascii_case(&ours.mime_type)
                })
            })
    }
}

/// Room routing codecs: opus stereo audio and VP8 video.
#[must_use]
pub fn default_codecs() -> Vec<RtpCodec> {
    let mut vp8_params = Map::new();
    vp8_params.insert("x-google-start-bitrate".to_string(), Value::from(1000));

    vec![
        RtpCodec {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: Some(2),
            parameters: Map::new(),
        },
        RtpCodec {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: None,
            parameters: vp8_params,
        },
    ]
}

/// Application metadata attached to a producer.
///
/// `isScreen` is the only key the coordinator interprets; everything else is
/// carried through to `new-producer` and `consume` acknowledgements untouched.
/// Older clients send the flag as `screen`; both spellings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct AppData {
    #[serde(rename = "isScreen")]
    pub is_screen: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Map<String, Value>> for AppData {
    fn from(mut extra: Map<String, Value>) -> Self {
        let current = extra.remove("isScreen").and_then(|v| v.as_bool());
        let legacy = extra.remove("screen").and_then(|v| v.as_bool());

        Self {
            is_screen: current.or(legacy).unwrap_or(false),
            extra,
        }
    }
}

impl AppData {
    #[must_use]
    pub fn screen() -> Self {
        Self {
            is_screen: true,
            extra: Map::new(),
        }
    }
}

/// Listen settings for a new transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    pub listen_ip: String,
    pub announced_ip: String,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub direction: Direction,
}

impl TransportOptions {
    #[must_use]
    pub fn new(
        listen_ip: impl Into<String>,
        announced_ip: impl Into<String>,
        direction: Direction,
    ) -> Self {
        Self {
            listen_ip: listen_ip.into(),
            announced_ip: announced_ip.into(),
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            direction,
        }
    }
}

/// Connection parameters the remote endpoint needs to reach a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// Parameters of a freshly created consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub paused: bool,
}

/// Closure notifications raised by a router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A transport closed (explicitly or because the router closed).
    TransportClosed { transport_id: String },
    /// A producer closed (explicitly or with its transport).
    ProducerClosed { producer_id: String },
    /// A consumer closed together with its own transport.
    ConsumerClosed { consumer_id: String },
    /// A consumer closed because its source producer closed.
    ConsumerProducerClosed {
        consumer_id: String,
        producer_id: String,
    },
}

pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;
pub type MediaEventReceiver = mpsc::UnboundedReceiver<MediaEvent>;

/// Media engine errors.
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    #[error("media worker is not running")]
    WorkerDead,

    #[error("router closed")]
    RouterClosed,

    #[error("unknown {0}")]
    Unknown(&'static str),

    #[error("cannot consume: {0}")]
    CannotConsume(String),

    #[error("engine failure: {0}")]
    Engine(String),
}

impl From<MediaError> for CoordinatorError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::CannotConsume(reason) => CoordinatorError::CapabilityMismatch(reason),
            other => CoordinatorError::MediaEngine(other.to_string()),
        }
    }
}

/// Process-wide media worker.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Allocate a routing handle for `room_id`. Closure events for everything
    /// created on the router are pushed to `events`.
    async fn create_router(
        &self,
        room_id: &RoomId,
        codecs: Vec<RtpCodec>,
        events: MediaEventSender,
    ) -> Result<Box<dyn MediaRouter>, MediaError>;

    /// Resolves once the worker has died. Never resolves for a healthy worker.
    async fn worker_died(&self);

    /// Whether the worker is currently running.
    fn is_alive(&self) -> bool;
}

/// Per-room routing handle.
#[async_trait]
pub trait MediaRouter: Send + Sync {
    fn id(&self) -> &str;

    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Whether a consumer with `caps` could decode `producer_id`.
    async fn can_consume(&self, producer_id: &str, caps: &RtpCapabilities) -> bool;

    async fn create_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<TransportParams, MediaError>;

    async fn connect_transport(
        &self,
        transport_id: &str,
        remote_parameters: &Value,
    ) -> Result<(), MediaError>;

    /// Returns the new producer's id.
    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: AppData,
    ) -> Result<String, MediaError>;

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        caps: &RtpCapabilities,
        paused: bool,
    ) -> Result<ConsumerParams, MediaError>;

    async fn resume_consumer(&self, consumer_id: &str) -> Result<(), MediaError>;

    /// Close a transport and everything created on it. Unknown ids are a no-op.
    async fn close_transport(&self, transport_id: &str) -> Result<(), MediaError>;

    /// Close a producer and every consumer of it. Unknown ids are a no-op.
    async fn close_producer(&self, producer_id: &str) -> Result<(), MediaError>;

    /// Close a consumer. Unknown ids are a no-op.
    async fn close_consumer(&self, consumer_id: &str) -> Result<(), MediaError>;

    /// Close the router and everything on it.
    async fn close(&self);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_app_data_accepts_legacy_screen_key() {
        let legacy: AppData =
            serde_json::from_value(json!({"screen": true, "label": "cam"})).unwrap();
        assert!(legacy.is_screen);
        assert_eq!(legacy.extra.get("label"), Some(&json!("cam")));

        let current: AppData = serde_json::from_value(json!({"isScreen": true})).unwrap();
        assert!(current.is_screen);

        let plain: AppData = serde_json::from_value(json!({})).unwrap();
        assert!(!plain.is_screen);
    }

    #[test]
    fn test_app_data_serializes_is_screen() {
        let value = serde_json::to_value(AppData::screen()).unwrap();
        assert_eq!(value, json!({"isScreen": true}));
    }

    #[test]
    fn test_default_codecs() {
        let codecs = default_codecs();
        assert_eq!(codecs.len(), 2);

        let opus = codecs.iter().find(|c| c.kind == MediaKind::Audio).unwrap();
        assert_eq!(opus.mime_type, "audio/opus");
        assert_eq!(opus.clock_rate, 48000);
        assert_eq!(opus.channels, Some(2));

        let vp8 = codecs.iter().find(|c| c.kind == MediaKind::Video).unwrap();
        assert_eq!(vp8.clock_rate, 90000);
        assert_eq!(vp8.parameters.get("x-google-start-bitrate"), Some(&json!(1000)));
    }

    #[test]
    fn test_shares_codec_by_kind_and_mime_type() {
        let router = RtpCapabilities {
            codecs: default_codecs(),
            header_extensions: Vec::new(),
        };
        let audio_only: RtpCapabilities = serde_json::from_value(json!({
            "codecs": [{"kind": "audio", "mimeType": "AUDIO/OPUS", "clockRate": 48000, "channels": 2}]
        }))
        .unwrap();

        assert!(router.shares_codec(&audio_only, MediaKind::Audio));
        assert!(!router.shares_codec(&audio_only, MediaKind::Video));
    }

    #[test]
    fn test_cannot_consume_maps_to_capability_mismatch() {
        let err: CoordinatorError = MediaError::CannotConsume("video".to_string()).into();
        assert!(matches!(err, CoordinatorError::CapabilityMismatch(_)));

        let err: CoordinatorError = MediaError::WorkerDead.into();
        assert!(matches!(err, CoordinatorError::MediaEngine(_)));
    }
}
