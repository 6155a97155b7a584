//! Test fixtures for coordinator testing.
//!
//! Provides:
//! - `TestCoordinator` - a registry and chat service wired to the mocks
//! - `TestPeer` - a connection actor driven with protocol frames, the way the
//!   gateway drives it, with helpers for awaiting acks and events

use crate::mock_media::MockMediaEngine;
use crate::mock_store::MockChatStore;
use common::types::{PeerId, RoomId};
use rtc_coordinator::actors::{
    ActorMetrics, ConnectionActor, ConnectionActorHandle, RoomRegistryHandle, RoomSettings,
    RoomState,
};
use rtc_coordinator::chat::ChatService;
use rtc_coordinator::errors::ErrorPayload;
use rtc_coordinator::media::default_codecs;
use rtc_coordinator::protocol::{AckOutcome, ClientFrame, ServerEvent, ServerFrame};
use rtc_coordinator::sink::EventSink;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long a fixture waits for an ack or event before failing the test.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// A coordinator core (registry + chat) backed by the mocks.
pub struct TestCoordinator {
    pub registry: RoomRegistryHandle,
    pub chat: Arc<ChatService>,
    pub metrics: Arc<ActorMetrics>,
    pub engine: MockMediaEngine,
    pub store: MockChatStore,
}

impl TestCoordinator {
    /// Create a coordinator with default settings and fault-free mocks.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new TestCoordinator builder.
    #[must_use]
    pub fn builder() -> TestCoordinatorBuilder {
        TestCoordinatorBuilder::default()
    }

    /// Open a connection, as the gateway does after a websocket upgrade.
    #[must_use]
    pub fn connect(&self) -> TestPeer {
        let peer_id = PeerId::new();
        let (sink, rx) = EventSink::channel(peer_id);
        let (handle, task) = ConnectionActor::spawn(
            peer_id,
            sink,
            self.registry.clone(),
            Arc::clone(&self.chat),
            self.registry.child_token(),
            Arc::clone(&self.metrics),
        );

        TestPeer {
            peer_id,
            handle,
            task: Some(task),
            rx,
            next_id: 1,
            pending: VecDeque::new(),
        }
    }

    /// Snapshot of a live room, or `None` if the registry has no such room.
    pub async fn room_state(&self, room_id: &str) -> Option<RoomState> {
        let room = self
            .registry
            .get_room(RoomId::new(room_id))
            .await
            .expect("registry should answer")?;
        room.get_state().await.ok()
    }

    /// Wait until the registry no longer lists `room_id`.
    pub async fn wait_for_room_removed(&self, room_id: &str) {
        let room_id = RoomId::new(room_id);
        tokio::time::timeout(DEFAULT_WAIT, async {
            loop {
                let status = self.registry.get_status().await.expect("registry should answer");
                if !status.room_ids.contains(&room_id) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("room {room_id} was not removed"));
    }
}

impl Default for TestCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for TestCoordinator configuration.
#[derive(Default)]
pub struct TestCoordinatorBuilder {
    engine: Option<MockMediaEngine>,
    store: Option<MockChatStore>,
    settings: RoomSettings,
    store_timeout: Option<Duration>,
}

impl TestCoordinatorBuilder {
    /// Use a preconfigured media engine.
    #[must_use]
    pub fn engine(mut self, engine: MockMediaEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Use a preconfigured chat store.
    #[must_use]
    pub fn store(mut self, store: MockChatStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the room settings.
    #[must_use]
    pub fn settings(mut self, settings: RoomSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the media call deadline.
    #[must_use]
    pub fn media_timeout(mut self, timeout: Duration) -> Self {
        self.settings.media_timeout = timeout;
        self
    }

    /// Set the chat store call deadline.
    #[must_use]
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    /// Build the TestCoordinator. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn build(self) -> TestCoordinator {
        let engine = self.engine.unwrap_or_default();
        let store = self.store.unwrap_or_default();
        let metrics = ActorMetrics::new();

        let registry = RoomRegistryHandle::new(
            "rtc-test".to_string(),
            Arc::new(engine.clone()),
            self.settings,
            Arc::clone(&metrics),
        );
        let chat = Arc::new(ChatService::new(
            Arc::new(store.clone()),
            self.store_timeout.unwrap_or(Duration::from_secs(1)),
        ));

        TestCoordinator {
            registry,
            chat,
            metrics,
            engine,
            store,
        }
    }
}

/// A connected peer driven through its connection actor.
///
/// Events that arrive while waiting for an ack are buffered and returned by
/// the event helpers in arrival order.
pub struct TestPeer {
    pub peer_id: PeerId,
    handle: ConnectionActorHandle,
    task: Option<JoinHandle<()>>,
    rx: mpsc::Receiver<ServerFrame>,
    next_id: u64,
    pending: VecDeque<ServerEvent>,
}

impl TestPeer {
    /// Send a frame with an ack id and wait for its acknowledgement.
    pub async fn request(&mut self, event: &str, data: Value) -> Result<Value, ErrorPayload> {
        let id = self.next_id;
        self.next_id += 1;
        self.send_raw(json!({"v": 1, "id": id, "event": event, "data": data}))
            .await;

        loop {
            match self.recv_frame().await {
                ServerFrame::Ack { ack, outcome } if ack == id => {
                    return match outcome {
                        AckOutcome::Ok(value) => Ok(value),
                        AckOutcome::Error(payload) => Err(payload),
                    };
                }
                ServerFrame::Ack { ack, .. } => panic!("unexpected ack {ack} while waiting for {id}"),
                ServerFrame::Event(event) => self.pending.push_back(event),
            }
        }
    }

    /// Send a frame without an ack id.
    pub async fn send(&mut self, event: &str, data: Value) {
        self.send_raw(json!({"v": 1, "event": event, "data": data}))
            .await;
    }

    async fn send_raw(&mut self, frame: Value) {
        let frame = ClientFrame::parse(&frame.to_string()).expect("test frame should be valid");
        self.handle
            .request(frame)
            .await
            .expect("connection actor should accept requests");
    }

    async fn recv_frame(&mut self) -> ServerFrame {
        tokio::time::timeout(DEFAULT_WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a server frame")
            .expect("outbound queue closed")
    }

    /// Next server event.
    pub async fn next_event(&mut self) -> ServerEvent {
        if let Some(event) = self.pending.pop_front() {
            return event;
        }
        loop {
            match self.recv_frame().await {
                ServerFrame::Event(event) => return event,
                ServerFrame::Ack { ack, .. } => panic!("unexpected ack {ack} while waiting for an event"),
            }
        }
    }

    /// Wait for the first event matching `predicate`. Other events stay buffered.
    pub async fn wait_for(&mut self, predicate: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
        if let Some(pos) = self.pending.iter().position(&predicate) {
            return self.pending.remove(pos).expect("position is in range");
        }
        loop {
            match self.recv_frame().await {
                ServerFrame::Event(event) if predicate(&event) => return event,
                ServerFrame::Event(event) => self.pending.push_back(event),
                ServerFrame::Ack { ack, .. } => panic!("unexpected ack {ack} while waiting for an event"),
            }
        }
    }

    /// Every event delivered so far, without waiting.
    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        let mut events: Vec<ServerEvent> = self.pending.drain(..).collect();
        while let Ok(frame) = self.rx.try_recv() {
            if let ServerFrame::Event(event) = frame {
                events.push(event);
            }
        }
        events
    }

    /// Join `room_id` and return the join acknowledgement.
    pub async fn join_room(&mut self, room_id: &str) -> Value {
        self.request("join-room", json!({"roomId": room_id, "userMetadata": {}}))
            .await
            .expect("join-room should succeed")
    }

    /// Create a transport and return its id.
    pub async fn create_transport(&mut self, direction: &str) -> String {
        let ack = self
            .request("create-transport", json!({"direction": direction}))
            .await
            .expect("create-transport should succeed");
        ack["id"].as_str().expect("transport id").to_string()
    }

    /// Produce a track on `transport_id` and return the producer id.
    pub async fn produce(&mut self, transport_id: &str, kind: &str, is_screen: bool) -> Result<String, ErrorPayload> {
        let ack = self
            .request(
                "produce",
                json!({
                    "transportId": transport_id,
                    "kind": kind,
                    "rtpParameters": {},
                    "appData": {"isScreen": is_screen},
                }),
            )
            .await?;
        Ok(ack["producerId"].as_str().expect("producer id").to_string())
    }

    /// Consume `producer_id` with receive capabilities that match the room codecs.
    pub async fn consume(&mut self, producer_id: &str) -> Result<Value, ErrorPayload> {
        self.request(
            "consume",
            json!({
                "producerId": producer_id,
                "rtpCapabilities": {"codecs": default_codecs()},
            }),
        )
        .await
    }

    /// Close the socket side and wait for the actor to finish cleanup.
    pub async fn close(mut self) {
        self.handle
            .closed()
            .await
            .expect("connection actor should accept close");
        if let Some(task) = self.task.take() {
            tokio::time::timeout(DEFAULT_WAIT, task)
                .await
                .expect("connection actor did not stop")
                .expect("connection actor panicked");
        }
    }
}
