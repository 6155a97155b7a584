//! Media resource broker.
//!
//! Transport, producer and consumer operations for a joined peer. These run
//! inside the owning `RoomActor`, so ownership checks and the media engine call
//! that follows them cannot interleave with another request for the same room.

use super::peer::{ConsumerEntry, ProducerEntry, TransportEntry};
use super::room::RoomActor;
use super::screen_share::Grant;
use crate::config::RecvTransportPolicy;
use crate::errors::CoordinatorError;
use crate::media::{AppData, Direction, MediaKind, RtpCapabilities, TransportOptions};
use crate::protocol::{ConsumeAck, CreateTransportAck, ServerEvent};
use common::types::PeerId;
use serde_json::Value;
use tracing::{debug, info, warn};

impl RoomActor {
    /// Allocate a transport for `peer_id`.
    ///
    /// A second recv transport either replaces the first (its consumers close
    /// and the peer receives `consumer-closed` for each) or is rejected,
    /// depending on the configured policy.
    pub(super) async fn create_transport(
        &mut self,
        peer_id: PeerId,
        direction: Direction,
    ) -> Result<CreateTransportAck, CoordinatorError> {
        let peer = self
            .peers
            .get(&peer_id)
            .ok_or(CoordinatorError::PeerNotFound)?;

        let previous_recv = match direction {
            Direction::Recv => peer.recv_transport().map(str::to_string),
            Direction::Send => None,
        };
        if previous_recv.is_some()
            && self.settings.recv_transport_policy == RecvTransportPolicy::Reject
        {
            return Err(CoordinatorError::Conflict(
                "recv transport already exists".to_string(),
            ));
        }

        let options = TransportOptions::new(
            self.settings.listen_ip.as_str(),
            self.settings.announced_ip.as_str(),
            direction,
        );
        let params = self
            .media_call("create_transport", self.router.create_transport(&options))
            .await?;

        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.transports
                .insert(params.id.clone(), TransportEntry { direction });
        }

        if let Some(old_transport_id) = previous_recv {
            self.replace_recv_transport(peer_id, &old_transport_id).await;
        }

        debug!(
            target: "rtc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            transport_id = %params.id,
            direction = direction.as_str(),
            "Transport created"
        );

        Ok(CreateTransportAck {
            id: params.id.clone(),
            connection_parameters: params,
        })
    }

    /// Drop the peer's old recv transport after a replacement was created.
    async fn replace_recv_transport(&mut self, peer_id: PeerId, old_transport_id: &str) {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            for (consumer_id, consumer) in peer.take_transport(old_transport_id) {
                peer.sink.deliver(ServerEvent::ConsumerClosed {
                    consumer_id,
                    producer_id: consumer.producer_id,
                });
            }
        }

        if let Err(e) = self
            .media_call(
                "close_transport",
                self.router.close_transport(old_transport_id),
            )
            .await
        {
            warn!(
                target: "rtc.actor.room",
                room_id = %self.room_id,
                transport_id = %old_transport_id,
                error = %e,
                "Failed to close replaced recv transport"
            );
        }

        info!(
            target: "rtc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            transport_id = %old_transport_id,
            "Recv transport replaced"
        );
    }

    pub(super) async fn connect_transport(
        &mut self,
        peer_id: PeerId,
        transport_id: &str,
        remote_parameters: &Value,
    ) -> Result<(), CoordinatorError> {
        let peer = self
            .peers
            .get(&peer_id)
            .ok_or(CoordinatorError::PeerNotFound)?;
        if !peer.transports.contains_key(transport_id) {
            return Err(CoordinatorError::TransportNotFound(transport_id.to_string()));
        }

        self.media_call(
            "connect_transport",
            self.router.connect_transport(transport_id, remote_parameters),
        )
        .await
    }

    /// Publish a track. Screen-tagged tracks need the screen-share token.
    pub(super) async fn produce(
        &mut self,
        peer_id: PeerId,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: AppData,
    ) -> Result<String, CoordinatorError> {
        let peer = self
            .peers
            .get(&peer_id)
            .ok_or(CoordinatorError::PeerNotFound)?;
        let transport = peer
            .transports
            .get(&transport_id)
            .ok_or_else(|| CoordinatorError::TransportNotFound(transport_id.clone()))?;
        if transport.direction != Direction::Send {
            return Err(CoordinatorError::InvalidPayload(
                "cannot produce on a recv transport".to_string(),
            ));
        }

        let grant = if app_data.is_screen {
            Some(self.arbiter.acquire(peer_id)?)
        } else {
            None
        };

        let produced = self
            .media_call(
                "produce",
                self.router
                    .produce(&transport_id, kind, rtp_parameters, app_data.clone()),
            )
            .await;

        let producer_id = match produced {
            Ok(producer_id) => producer_id,
            Err(e) => {
                // Nobody was told about the grant yet.
                if grant == Some(Grant::Acquired) {
                    self.arbiter.release(peer_id);
                }
                return Err(e);
            }
        };

        if grant == Some(Grant::Acquired) {
            info!(
                target: "rtc.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "Screen share started"
            );
            self.broadcast(None, &ServerEvent::ScreenShareStarted { peer_id });
        }

        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.producers.insert(
                producer_id.clone(),
                ProducerEntry {
                    transport_id,
                    kind,
                    app_data: app_data.clone(),
                },
            );
        }

        self.broadcast(
            Some(peer_id),
            &ServerEvent::NewProducer {
                peer_id,
                producer_id: producer_id.clone(),
                kind,
                app_data,
            },
        );

        debug!(
            target: "rtc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            producer_id = %producer_id,
            kind = kind.as_str(),
            "Producer created"
        );

        Ok(producer_id)
    }

    /// Subscribe `peer_id` to a producer anywhere in the room.
    pub(super) async fn consume(
        &mut self,
        peer_id: PeerId,
        producer_id: String,
        capabilities: &RtpCapabilities,
    ) -> Result<ConsumeAck, CoordinatorError> {
        let consumer_peer = self
            .peers
            .get(&peer_id)
            .ok_or(CoordinatorError::PeerNotFound)?;

        let (kind, app_data) = self
            .peers
            .values()
            .find_map(|peer| peer.producers.get(&producer_id))
            .map(|entry| (entry.kind, entry.app_data.clone()))
            .ok_or_else(|| CoordinatorError::ProducerNotFound(producer_id.clone()))?;

        let recv_transport_id = consumer_peer.recv_transport().map(str::to_string);

        let decodable = tokio::time::timeout(
            self.settings.media_timeout,
            self.router.can_consume(&producer_id, capabilities),
        )
        .await
        .map_err(|_| CoordinatorError::Timeout("can_consume".to_string()))?;
        if !decodable {
            return Err(CoordinatorError::CapabilityMismatch(format!(
                "cannot decode {}",
                kind.as_str()
            )));
        }

        let transport_id = recv_transport_id
            .ok_or_else(|| CoordinatorError::TransportNotFound("recv".to_string()))?;

        let params = self
            .media_call(
                "consume",
                self.router
                    .consume(&transport_id, &producer_id, capabilities, false),
            )
            .await?;

        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.consumers.insert(
                params.id.clone(),
                ConsumerEntry {
                    transport_id,
                    producer_id: params.producer_id.clone(),
                    kind: params.kind,
                },
            );
        }

        debug!(
            target: "rtc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            consumer_id = %params.id,
            producer_id = %params.producer_id,
            "Consumer created"
        );

        Ok(ConsumeAck {
            consumer_id: params.id,
            producer_id: params.producer_id,
            kind: params.kind,
            media_parameters: params.rtp_parameters,
            app_data,
        })
    }

    pub(super) async fn resume_consumer(
        &mut self,
        peer_id: PeerId,
        consumer_id: &str,
    ) -> Result<(), CoordinatorError> {
        let peer = self
            .peers
            .get(&peer_id)
            .ok_or(CoordinatorError::PeerNotFound)?;
        if !peer.consumers.contains_key(consumer_id) {
            return Err(CoordinatorError::ConsumerNotFound(consumer_id.to_string()));
        }

        self.media_call("resume_consumer", self.router.resume_consumer(consumer_id))
            .await
    }

    /// Close the holder's screen producers and release the token.
    /// Returns false (and does nothing) if `peer_id` is not the holder.
    pub(super) async fn stop_screen_share(
        &mut self,
        peer_id: PeerId,
    ) -> Result<bool, CoordinatorError> {
        let peer = self
            .peers
            .get_mut(&peer_id)
            .ok_or(CoordinatorError::PeerNotFound)?;
        if !self.arbiter.is_held_by(peer_id) {
            return Ok(false);
        }

        let screen_producers = peer.screen_producers();
        for producer_id in &screen_producers {
            peer.producers.remove(producer_id);
        }

        for producer_id in &screen_producers {
            if let Err(e) = self
                .media_call("close_producer", self.router.close_producer(producer_id))
                .await
            {
                warn!(
                    target: "rtc.actor.room",
                    room_id = %self.room_id,
                    producer_id = %producer_id,
                    error = %e,
                    "Failed to close screen producer"
                );
            }
        }

        self.release_screen_share(peer_id);
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use crate::actors::metrics::ActorMetrics;
    use crate::actors::room::{RoomActor, RoomActorHandle, RoomSettings};
    use crate::config::RecvTransportPolicy;
    use crate::errors::CoordinatorError;
    use crate::media::{
        default_codecs, AppData, Direction, LocalMediaEngine, MediaEngine, MediaKind,
        RtpCapabilities,
    };
    use crate::protocol::{ServerEvent, ServerFrame};
    use crate::sink::EventSink;
    use common::types::{PeerId, RoomId};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    async fn spawn_room(policy: RecvTransportPolicy) -> RoomActorHandle {
        let engine = LocalMediaEngine::new(10000, 10100);
        let room_id = RoomId::new("R1");
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let router = engine
            .create_router(&room_id, default_codecs(), events_tx)
            .await
            .unwrap();
        let (idle_tx, _idle_rx) = mpsc::unbounded_channel();
        let settings = RoomSettings {
            recv_transport_policy: policy,
            ..RoomSettings::default()
        };

        let (handle, _task) = RoomActor::spawn(
            room_id,
            router,
            events_rx,
            Arc::new(settings),
            idle_tx,
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        handle
    }

    async fn join(room: &RoomActorHandle) -> (PeerId, mpsc::Receiver<ServerFrame>) {
        let peer_id = PeerId::new();
        let (sink, rx) = EventSink::channel(peer_id);
        room.enqueue_join(peer_id, Value::Null, sink)
            .await
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        (peer_id, rx)
    }

    fn full_caps() -> RtpCapabilities {
        RtpCapabilities {
            codecs: default_codecs(),
            header_extensions: Vec::new(),
        }
    }

    fn audio_only_caps() -> RtpCapabilities {
        serde_json::from_value(json!({
            "codecs": [{"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2}]
        }))
        .unwrap()
    }

    async fn next_event(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerEvent {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            ServerFrame::Event(event) => event,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_requests_from_unjoined_peer_fail() {
        let room = spawn_room(RecvTransportPolicy::Replace).await;
        let stranger = PeerId::new();

        let err = room
            .create_transport(stranger, Direction::Send)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::PeerNotFound));
    }

    #[tokio::test]
    async fn test_transport_ownership_is_enforced() {
        let room = spawn_room(RecvTransportPolicy::Replace).await;
        let (a, _rx_a) = join(&room).await;
        let (b, _rx_b) = join(&room).await;

        let send = room.create_transport(a, Direction::Send).await.unwrap();

        let err = room
            .connect_transport(b, send.id.clone(), json!({"fingerprints": []}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::TransportNotFound(_)));

        let err = room
            .produce(b, send.id.clone(), MediaKind::Audio, json!({}), AppData::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::TransportNotFound(_)));

        room.connect_transport(a, send.id, json!({"fingerprints": []}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_produce_on_recv_transport_is_rejected() {
        let room = spawn_room(RecvTransportPolicy::Replace).await;
        let (a, _rx) = join(&room).await;
        let recv = room.create_transport(a, Direction::Recv).await.unwrap();

        let err = room
            .produce(a, recv.id, MediaKind::Video, json!({}), AppData::default())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), 1);
    }

    #[tokio::test]
    async fn test_new_producer_reaches_other_peers() {
        let room = spawn_room(RecvTransportPolicy::Replace).await;
        let (a, mut rx_a) = join(&room).await;
        let (_b, mut rx_b) = join(&room).await;
        // A sees B join.
        next_event(&mut rx_a).await;

        let send = room.create_transport(a, Direction::Send).await.unwrap();
        let producer_id = room
            .produce(a, send.id, MediaKind::Video, json!({}), AppData::default())
            .await
            .unwrap();

        match next_event(&mut rx_b).await {
            ServerEvent::NewProducer {
                peer_id,
                producer_id: announced,
                kind,
                ..
            } => {
                assert_eq!(peer_id, a);
                assert_eq!(announced, producer_id);
                assert_eq!(kind, MediaKind::Video);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_consume_checks_producer_capabilities_then_transport() {
        let room = spawn_room(RecvTransportPolicy::Replace).await;
        let (a, _rx_a) = join(&room).await;
        let (b, _rx_b) = join(&room).await;

        let send = room.create_transport(a, Direction::Send).await.unwrap();
        let video = room
            .produce(a, send.id, MediaKind::Video, json!({}), AppData::default())
            .await
            .unwrap();

        let err = room
            .consume(b, "missing".to_string(), full_caps())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::ProducerNotFound(_)));

        let err = room
            .consume(b, video.clone(), audio_only_caps())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), 8);

        let err = room
            .consume(b, video.clone(), full_caps())
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::TransportNotFound(_)));

        room.create_transport(b, Direction::Recv).await.unwrap();
        let ack = room.consume(b, video.clone(), full_caps()).await.unwrap();
        assert_eq!(ack.producer_id, video);
        assert_eq!(ack.kind, MediaKind::Video);

        room.resume_consumer(b, ack.consumer_id.clone()).await.unwrap();
        let err = room.resume_consumer(a, ack.consumer_id).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::ConsumerNotFound(_)));
    }

    #[tokio::test]
    async fn test_second_recv_transport_replaces_first() {
        let room = spawn_room(RecvTransportPolicy::Replace).await;
        let (a, _rx_a) = join(&room).await;
        let (b, mut rx_b) = join(&room).await;

        let send = room.create_transport(a, Direction::Send).await.unwrap();
        let producer = room
            .produce(a, send.id, MediaKind::Audio, json!({}), AppData::default())
            .await
            .unwrap();

        let first = room.create_transport(b, Direction::Recv).await.unwrap();
        let consumer = room.consume(b, producer.clone(), full_caps()).await.unwrap();
        // B saw A's producer.
        next_event(&mut rx_b).await;

        let second = room.create_transport(b, Direction::Recv).await.unwrap();
        assert_ne!(first.id, second.id);

        assert_eq!(
            next_event(&mut rx_b).await,
            ServerEvent::ConsumerClosed {
                consumer_id: consumer.consumer_id,
                producer_id: producer,
            }
        );

        let state = room.get_state().await.unwrap();
        assert_eq!(state.consumer_count, 0);
        // A's send transport and B's new recv transport.
        assert_eq!(state.transport_count, 2);
    }

    #[tokio::test]
    async fn test_second_recv_transport_rejected_by_policy() {
        let room = spawn_room(RecvTransportPolicy::Reject).await;
        let (a, _rx) = join(&room).await;

        room.create_transport(a, Direction::Recv).await.unwrap();
        let err = room.create_transport(a, Direction::Recv).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Conflict(_)));

        // Send transports are not limited.
        room.create_transport(a, Direction::Send).await.unwrap();
        room.create_transport(a, Direction::Send).await.unwrap();
    }

    #[tokio::test]
    async fn test_screen_share_arbitration() {
        let room = spawn_room(RecvTransportPolicy::Replace).await;
        let (a, mut rx_a) = join(&room).await;
        let (b, _rx_b) = join(&room).await;
        next_event(&mut rx_a).await;

        let send_a = room.create_transport(a, Direction::Send).await.unwrap();
        let send_b = room.create_transport(b, Direction::Send).await.unwrap();

        room.produce(a, send_a.id, MediaKind::Video, json!({}), AppData::screen())
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut rx_a).await,
            ServerEvent::ScreenShareStarted { peer_id: a }
        );

        let err = room
            .produce(b, send_b.id.clone(), MediaKind::Video, json!({}), AppData::screen())
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "another user is already sharing");

        // Non-holder stop is a no-op.
        assert!(!room.stop_screen_share(b).await.unwrap());
        assert!(room.stop_screen_share(a).await.unwrap());
        assert_eq!(
            next_event(&mut rx_a).await,
            ServerEvent::ScreenShareStopped { peer_id: a }
        );

        room.produce(b, send_b.id, MediaKind::Video, json!({}), AppData::screen())
            .await
            .unwrap();
        let state = room.get_state().await.unwrap();
        assert_eq!(state.screen_share_holder, Some(b));
        // A's screen producer was closed by the stop.
        assert_eq!(state.producer_count, 1);
    }
}
