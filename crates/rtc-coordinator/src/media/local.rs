//! In-process media engine.
//!
//! `LocalMediaEngine` keeps the resource bookkeeping a real SFU worker does
//! (ids, direction, producer/consumer graph, capability checks, cascading
//! closure) without moving any packets. The binary runs with it; tests drive
//! it directly or through the failure-injecting wrapper in `rtc-test-utils`.

use super::supervisor::EngineLauncher;
use super::{
    AppData, ConsumerParams, Direction, MediaEngine, MediaError, MediaEvent, MediaEventSender,
    MediaKind, MediaRouter, RtpCapabilities, RtpCodec, TransportOptions, TransportParams,
};
use async_trait::async_trait;
use common::types::RoomId;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Shared worker state. Routers hold a reference so a dead worker fails them all.
#[derive(Debug)]
struct Worker {
    id: String,
    died: CancellationToken,
    min_port: u16,
    port_span: u32,
    next_port: AtomicU32,
    live_routers: AtomicUsize,
}

impl Worker {
    fn ensure_alive(&self) -> Result<(), MediaError> {
        if self.died.is_cancelled() {
            Err(MediaError::WorkerDead)
        } else {
            Ok(())
        }
    }

    fn allocate_port(&self) -> u16 {
        let offset = self.next_port.fetch_add(1, Ordering::Relaxed) % self.port_span;
        let offset = u16::try_from(offset).unwrap_or(0);
        self.min_port.saturating_add(offset)
    }
}

/// In-process media engine (one worker).
#[derive(Debug, Clone)]
pub struct LocalMediaEngine {
    worker: Arc<Worker>,
}

impl LocalMediaEngine {
    /// Start a worker that hands out ports from the inclusive range `min_port..=max_port`.
    #[must_use]
    pub fn new(min_port: u16, max_port: u16) -> Self {
        let port_span = u32::from(max_port.saturating_sub(min_port)) + 1;
        let worker = Worker {
            id: format!("worker-{}", short_id()),
            died: CancellationToken::new(),
            min_port,
            port_span,
            next_port: AtomicU32::new(0),
            live_routers: AtomicUsize::new(0),
        };

        info!(
            target: "rtc.media",
            worker_id = %worker.id,
            min_port,
            max_port,
            "Media worker created"
        );

        Self {
            worker: Arc::new(worker),
        }
    }

    /// Worker identifier (for logs).
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker.id
    }

    /// Simulate the worker process dying.
    pub fn kill_worker(&self) {
        error!(
            target: "rtc.media",
            worker_id = %self.worker.id,
            "Media worker died"
        );
        self.worker.died.cancel();
    }

    /// Routers created on this worker and not yet closed.
    #[must_use]
    pub fn live_routers(&self) -> usize {
        self.worker.live_routers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaEngine for LocalMediaEngine {
    async fn create_router(
        &self,
        room_id: &RoomId,
        codecs: Vec<RtpCodec>,
        events: MediaEventSender,
    ) -> Result<Box<dyn MediaRouter>, MediaError> {
        self.worker.ensure_alive()?;

        let router = LocalRouter {
            id: format!("router-{}", short_id()),
            capabilities: RtpCapabilities {
                codecs,
                header_extensions: Vec::new(),
            },
            worker: Arc::clone(&self.worker),
            state: Mutex::new(RouterState::default()),
            events,
            closed: AtomicBool::new(false),
        };

        self.worker.live_routers.fetch_add(1, Ordering::SeqCst);

        debug!(
            target: "rtc.media",
            worker_id = %self.worker.id,
            router_id = %router.id,
            room_id = %room_id,
            "Router created"
        );

        Ok(Box::new(router))
    }

    async fn worker_died(&self) {
        self.worker.died.cancelled().await;
    }

    fn is_alive(&self) -> bool {
        !self.worker.died.is_cancelled()
    }
}

#[derive(Debug)]
struct LocalTransport {
    direction: Direction,
    connected: bool,
    producers: HashSet<String>,
    consumers: HashSet<String>,
}

#[derive(Debug)]
struct LocalProducer {
    transport_id: String,
    kind: MediaKind,
    consumers: HashSet<String>,
}

#[derive(Debug)]
struct LocalConsumer {
    transport_id: String,
    producer_id: String,
    paused: bool,
}

#[derive(Debug, Default)]
struct RouterState {
    transports: HashMap<String, LocalTransport>,
    producers: HashMap<String, LocalProducer>,
    consumers: HashMap<String, LocalConsumer>,
}

impl RouterState {
    /// Remove a producer and its consumers, returning the events to raise.
    fn remove_producer(&mut self, producer_id: &str, events: &mut Vec<MediaEvent>) {
        let Some(producer) = self.producers.remove(producer_id) else {
            return;
        };

        if let Some(transport) = self.transports.get_mut(&producer.transport_id) {
            transport.producers.remove(producer_id);
        }

        for consumer_id in producer.consumers {
            if let Some(consumer) = self.consumers.remove(&consumer_id) {
                if let Some(transport) = self.transports.get_mut(&consumer.transport_id) {
                    transport.consumers.remove(&consumer_id);
                }
                events.push(MediaEvent::ConsumerProducerClosed {
                    consumer_id,
                    producer_id: producer_id.to_string(),
                });
            }
        }

        events.push(MediaEvent::ProducerClosed {
            producer_id: producer_id.to_string(),
        });
    }

    fn remove_consumer(&mut self, consumer_id: &str, events: &mut Vec<MediaEvent>) {
        let Some(consumer) = self.consumers.remove(consumer_id) else {
            return;
        };

        if let Some(producer) = self.producers.get_mut(&consumer.producer_id) {
            producer.consumers.remove(consumer_id);
        }
        if let Some(transport) = self.transports.get_mut(&consumer.transport_id) {
            transport.consumers.remove(consumer_id);
        }

        events.push(MediaEvent::ConsumerClosed {
            consumer_id: consumer_id.to_string(),
        });
    }

    fn remove_transport(&mut self, transport_id: &str, events: &mut Vec<MediaEvent>) {
        let Some(transport) = self.transports.remove(transport_id) else {
            return;
        };

        for producer_id in &transport.producers {
            self.remove_producer(producer_id, events);
        }
        for consumer_id in &transport.consumers {
            self.remove_consumer(consumer_id, events);
        }

        events.push(MediaEvent::TransportClosed {
            transport_id: transport_id.to_string(),
        });
    }
}

/// Routing handle for one room.
struct LocalRouter {
    id: String,
    capabilities: RtpCapabilities,
    worker: Arc<Worker>,
    state: Mutex<RouterState>,
    events: MediaEventSender,
    closed: AtomicBool,
}

impl LocalRouter {
    fn ensure_usable(&self) -> Result<(), MediaError> {
        self.worker.ensure_alive()?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediaError::RouterClosed);
        }
        Ok(())
    }

    fn emit(&self, events: Vec<MediaEvent>) {
        for event in events {
            // Receiver gone means the room already stopped listening.
            let _ = self.events.send(event);
        }
    }

    fn codec_for(&self, kind: MediaKind) -> Option<&RtpCodec> {
        self.capabilities.codecs.iter().find(|c| c.kind == kind)
    }
}

#[async_trait]
impl MediaRouter for LocalRouter {
    fn id(&self) -> &str {
        &self.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    async fn can_consume(&self, producer_id: &str, caps: &RtpCapabilities) -> bool {
        let state = self.state.lock().await;
        match state.producers.get(producer_id) {
            Some(producer) => self.capabilities.shares_codec(caps, producer.kind),
            None => false,
        }
    }

    async fn create_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<TransportParams, MediaError> {
        self.ensure_usable()?;

        let id = Uuid::new_v4().to_string();
        let port = self.worker.allocate_port();

        let udp_priority: u32 = if options.prefer_udp {
            1_076_302_079
        } else {
            1_076_276_478
        };

        let mut candidates = Vec::new();
        if options.enable_udp {
            candidates.push(json!({
                "foundation": "udpcandidate",
                "ip": options.announced_ip,
                "port": port,
                "priority": udp_priority,
                "protocol": "udp",
                "type": "host",
            }));
        }
        if options.enable_tcp {
            candidates.push(json!({
                "foundation": "tcpcandidate",
                "ip": options.announced_ip,
                "port": port,
                "priority": 1_076_276_479_u32,
                "protocol": "tcp",
                "tcpType": "passive",
                "type": "host",
            }));
        }

        let params = TransportParams {
            id: id.clone(),
            ice_parameters: json!({
                "usernameFragment": short_id(),
                "password": Uuid::new_v4().simple().to_string(),
                "iceLite": true,
            }),
            ice_candidates: Value::Array(candidates),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{
                    "algorithm": "sha-256",
                    "value": fingerprint(),
                }],
            }),
        };

        self.state.lock().await.transports.insert(
            id.clone(),
            LocalTransport {
                direction: options.direction,
                connected: false,
                producers: HashSet::new(),
                consumers: HashSet::new(),
            },
        );

        debug!(
            target: "rtc.media",
            router_id = %self.id,
            transport_id = %id,
            direction = options.direction.as_str(),
            listen_ip = %options.listen_ip,
            port,
            "Transport created"
        );

        Ok(params)
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        remote_parameters: &Value,
    ) -> Result<(), MediaError> {
        self.ensure_usable()?;

        if remote_parameters.get("fingerprints").is_none() {
            return Err(MediaError::Engine(
                "remote DTLS parameters missing fingerprints".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or(MediaError::Unknown("transport"))?;

        if transport.connected {
            return Err(MediaError::Engine("transport already connected".to_string()));
        }
        transport.connected = true;
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        _rtp_parameters: Value,
        app_data: AppData,
    ) -> Result<String, MediaError> {
        self.ensure_usable()?;

        if self.codec_for(kind).is_none() {
            return Err(MediaError::Engine(format!(
                "router has no {} codec",
                kind.as_str()
            )));
        }

        let mut state = self.state.lock().await;
        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or(MediaError::Unknown("transport"))?;

        let producer_id = Uuid::new_v4().to_string();
        transport.producers.insert(producer_id.clone());
        state.producers.insert(
            producer_id.clone(),
            LocalProducer {
                transport_id: transport_id.to_string(),
                kind,
                consumers: HashSet::new(),
            },
        );

        debug!(
            target: "rtc.media",
            router_id = %self.id,
            producer_id = %producer_id,
            kind = kind.as_str(),
            is_screen = app_data.is_screen,
            "Producer created"
        );

        Ok(producer_id)
    }

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        caps: &RtpCapabilities,
        paused: bool,
    ) -> Result<ConsumerParams, MediaError> {
        self.ensure_usable()?;

        let mut state = self.state.lock().await;

        let kind = state
            .producers
            .get(producer_id)
            .map(|p| p.kind)
            .ok_or(MediaError::Unknown("producer"))?;

        if !self.capabilities.shares_codec(caps, kind) {
            return Err(MediaError::CannotConsume(format!(
                "no common {} codec",
                kind.as_str()
            )));
        }

        let codec = self
            .codec_for(kind)
            .cloned()
            .ok_or(MediaError::Unknown("codec"))?;

        let transport = state
            .transports
            .get_mut(transport_id)
            .ok_or(MediaError::Unknown("transport"))?;
        if transport.direction != Direction::Recv {
            return Err(MediaError::Engine(
                "consumers require a recv transport".to_string(),
            ));
        }

        let consumer_id = Uuid::new_v4().to_string();
        transport.consumers.insert(consumer_id.clone());
        if let Some(producer) = state.producers.get_mut(producer_id) {
            producer.consumers.insert(consumer_id.clone());
        }
        state.consumers.insert(
            consumer_id.clone(),
            LocalConsumer {
                transport_id: transport_id.to_string(),
                producer_id: producer_id.to_string(),
                paused,
            },
        );

        Ok(ConsumerParams {
            id: consumer_id,
            producer_id: producer_id.to_string(),
            kind,
            rtp_parameters: json!({
                "codecs": [codec],
                "encodings": [{ "ssrc": ssrc() }],
            }),
            paused,
        })
    }

    async fn resume_consumer(&self, consumer_id: &str) -> Result<(), MediaError> {
        self.ensure_usable()?;

        let mut state = self.state.lock().await;
        let consumer = state
            .consumers
            .get_mut(consumer_id)
            .ok_or(MediaError::Unknown("consumer"))?;
        if consumer.paused {
            consumer.paused = false;
            debug!(
                target: "rtc.media",
                router_id = %self.id,
                consumer_id = %consumer_id,
                "Consumer resumed"
            );
        }
        Ok(())
    }

    async fn close_transport(&self, transport_id: &str) -> Result<(), MediaError> {
        let mut events = Vec::new();
        self.state
            .lock()
            .await
            .remove_transport(transport_id, &mut events);
        self.emit(events);
        Ok(())
    }

    async fn close_producer(&self, producer_id: &str) -> Result<(), MediaError> {
        let mut events = Vec::new();
        self.state
            .lock()
            .await
            .remove_producer(producer_id, &mut events);
        self.emit(events);
        Ok(())
    }

    async fn close_consumer(&self, consumer_id: &str) -> Result<(), MediaError> {
        let mut events = Vec::new();
        self.state
            .lock()
            .await
            .remove_consumer(consumer_id, &mut events);
        self.emit(events);
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            let transport_ids: Vec<String> = state.transports.keys().cloned().collect();
            for transport_id in transport_ids {
                state.remove_transport(&transport_id, &mut events);
            }
        }
        self.emit(events);

        self.worker.live_routers.fetch_sub(1, Ordering::SeqCst);

        debug!(
            target: "rtc.media",
            router_id = %self.id,
            "Router closed"
        );
    }
}

fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id.get(..8).unwrap_or("00000000").to_string()
}

fn ssrc() -> u32 {
    (Uuid::new_v4().as_u128() & u128::from(u32::MAX)) as u32
}

fn fingerprint() -> String {
    let hex = Uuid::new_v4().simple().to_string() + &Uuid::new_v4().simple().to_string();
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_uppercase())
        .collect::<Vec<_>>()
        .join(":")
}

/// Launches a fresh [`LocalMediaEngine`] on the configured port range.
#[derive(Debug, Clone, Copy)]
pub struct LocalEngineLauncher {
    pub min_port: u16,
    pub max_port: u16,
}

#[async_trait]
impl EngineLauncher for LocalEngineLauncher {
    async fn launch(&self) -> Result<Arc<dyn MediaEngine>, MediaError> {
        Ok(Arc::new(LocalMediaEngine::new(self.min_port, self.max_port)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::default_codecs;
    use tokio::sync::mpsc;

    async fn router() -> (
        LocalMediaEngine,
        Box<dyn MediaRouter>,
        mpsc::UnboundedReceiver<MediaEvent>,
    ) {
        let engine = LocalMediaEngine::new(10000, 10100);
        let (tx, rx) = mpsc::unbounded_channel();
        let router = engine
            .create_router(&RoomId::new("room"), default_codecs(), tx)
            .await
            .unwrap();
        (engine, router, rx)
    }

    fn options(direction: Direction) -> TransportOptions {
        TransportOptions::new("0.0.0.0", "127.0.0.1", direction)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<MediaEvent>) -> Vec<MediaEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_transport_params_use_announced_ip_and_port_range() {
        let (_engine, router, _rx) = router().await;

        let params = router.create_transport(&options(Direction::Send)).await.unwrap();
        let candidates = params.ice_candidates.as_array().unwrap();
        assert_eq!(candidates.len(), 2);
        for candidate in candidates {
            assert_eq!(candidate["ip"], "127.0.0.1");
            let port = candidate["port"].as_u64().unwrap();
            assert!((10000..=10100).contains(&port));
        }
        assert_eq!(params.dtls_parameters["role"], "auto");
    }

    #[tokio::test]
    async fn test_connect_requires_known_transport() {
        let (_engine, router, _rx) = router().await;
        let remote = json!({"role": "client", "fingerprints": []});

        let result = router.connect_transport("missing", &remote).await;
        assert!(matches!(result, Err(MediaError::Unknown("transport"))));

        let params = router.create_transport(&options(Direction::Send)).await.unwrap();
        router.connect_transport(&params.id, &remote).await.unwrap();
        assert!(router.connect_transport(&params.id, &remote).await.is_err());
    }

    #[tokio::test]
    async fn test_consume_checks_capabilities() {
        let (_engine, router, _rx) = router().await;
        let send = router.create_transport(&options(Direction::Send)).await.unwrap();
        let recv = router.create_transport(&options(Direction::Recv)).await.unwrap();

        let producer_id = router
            .produce(&send.id, MediaKind::Video, json!({}), AppData::default())
            .await
            .unwrap();

        let audio_only = RtpCapabilities {
            codecs: default_codecs()
                .into_iter()
                .filter(|c| c.kind == MediaKind::Audio)
                .collect(),
            header_extensions: Vec::new(),
        };
        assert!(!router.can_consume(&producer_id, &audio_only).await);
        let result = router.consume(&recv.id, &producer_id, &audio_only, false).await;
        assert!(matches!(result, Err(MediaError::CannotConsume(_))));

        let full = router.rtp_capabilities();
        assert!(router.can_consume(&producer_id, &full).await);
        let consumer = router.consume(&recv.id, &producer_id, &full, false).await.unwrap();
        assert_eq!(consumer.kind, MediaKind::Video);
        assert_eq!(consumer.producer_id, producer_id);
    }

    #[tokio::test]
    async fn test_closing_transport_cascades() {
        let (_engine, router, mut rx) = router().await;
        let send = router.create_transport(&options(Direction::Send)).await.unwrap();
        let recv = router.create_transport(&options(Direction::Recv)).await.unwrap();
        let producer_id = router
            .produce(&send.id, MediaKind::Audio, json!({}), AppData::default())
            .await
            .unwrap();
        let consumer = router
            .consume(&recv.id, &producer_id, &router.rtp_capabilities(), false)
            .await
            .unwrap();

        router.close_transport(&send.id).await.unwrap();

        let events = drain(&mut rx);
        assert!(events.contains(&MediaEvent::ConsumerProducerClosed {
            consumer_id: consumer.id.clone(),
            producer_id: producer_id.clone(),
        }));
        assert!(events.contains(&MediaEvent::ProducerClosed {
            producer_id: producer_id.clone()
        }));
        assert!(events.contains(&MediaEvent::TransportClosed {
            transport_id: send.id.clone()
        }));

        // Second close is a no-op
        router.close_transport(&send.id).await.unwrap();
        assert!(drain(&mut rx).is_empty());

        // The consumer is gone
        assert!(router.resume_consumer(&consumer.id).await.is_err());
    }

    #[tokio::test]
    async fn test_dead_worker_fails_new_work() {
        let (engine, router, _rx) = router().await;
        engine.kill_worker();

        assert!(!engine.is_alive());
        let result = router.create_transport(&options(Direction::Send)).await;
        assert!(matches!(result, Err(MediaError::WorkerDead)));

        let (tx, _rx2) = mpsc::unbounded_channel();
        let result = engine.create_router(&RoomId::new("other"), default_codecs(), tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_router_close_releases_handle() {
        let (engine, router, _rx) = router().await;
        assert_eq!(engine.live_routers(), 1);

        router.close().await;
        router.close().await;
        assert_eq!(engine.live_routers(), 0);
    }
}
