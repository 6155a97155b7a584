//! Fault-injecting media engine for coordinator testing.
//!
//! Wraps the in-process [`LocalMediaEngine`] and can be configured to:
//! - Reject router creation
//! - Answer router creation slowly, to exercise media timeouts
//! - Close routers slowly, to hold a room in retirement
//! - Reject transport creation or produce calls
//! - Report every consume as undecodable
//!
//! Faults can be switched at any point of a test through [`MockMediaEngine::faults`].
//!
//! # Example
//!
//! ```rust,ignore
//! use rtc_test_utils::MockMediaEngine;
//!
//! let engine = MockMediaEngine::builder()
//!     .fail_create_router()
//!     .build();
//!
//! let registry = RoomRegistryHandle::new(
//!     "rtc-test".to_string(),
//!     Arc::new(engine.clone()),
//!     RoomSettings::default(),
//!     ActorMetrics::new(),
//! );
//! ```

use async_trait::async_trait;
use common::types::RoomId;
use rtc_coordinator::media::{
    AppData, ConsumerParams, LocalMediaEngine, MediaEngine, MediaError, MediaEventSender,
    MediaKind, MediaRouter, RtpCapabilities, RtpCodec, TransportOptions, TransportParams,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Runtime-switchable faults shared by the engine and every router it created.
#[derive(Debug, Default)]
pub struct MediaFaults {
    pub fail_create_router: AtomicBool,
    pub fail_create_transport: AtomicBool,
    pub fail_produce: AtomicBool,
    pub reject_consume: AtomicBool,
    router_delay_ms: AtomicUsize,
    close_delay_ms: AtomicUsize,
    routers_created: AtomicUsize,
}

impl MediaFaults {
    pub fn set_router_delay(&self, delay: Duration) {
        let millis = usize::try_from(delay.as_millis()).unwrap_or(usize::MAX);
        self.router_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn set_close_delay(&self, delay: Duration) {
        let millis = usize::try_from(delay.as_millis()).unwrap_or(usize::MAX);
        self.close_delay_ms.store(millis, Ordering::SeqCst);
    }

    fn router_delay(&self) -> Option<Duration> {
        delay_from(&self.router_delay_ms)
    }

    fn close_delay(&self) -> Option<Duration> {
        delay_from(&self.close_delay_ms)
    }
}

fn delay_from(millis: &AtomicUsize) -> Option<Duration> {
    match millis.load(Ordering::SeqCst) {
        0 => None,
        millis => Some(Duration::from_millis(millis as u64)),
    }
}

/// Media engine with injectable faults. Clones share the worker and the faults.
#[derive(Debug, Clone)]
pub struct MockMediaEngine {
    inner: LocalMediaEngine,
    faults: Arc<MediaFaults>,
}

impl Default for MockMediaEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockMediaEngine {
    /// Create a new MockMediaEngine builder.
    #[must_use]
    pub fn builder() -> MockMediaEngineBuilder {
        MockMediaEngineBuilder::default()
    }

    /// Fault switches, for changing behaviour mid-test.
    #[must_use]
    pub fn faults(&self) -> &MediaFaults {
        &self.faults
    }

    /// Successful `create_router` calls so far.
    #[must_use]
    pub fn routers_created(&self) -> usize {
        self.faults.routers_created.load(Ordering::SeqCst)
    }

    /// Routers created and not yet closed.
    #[must_use]
    pub fn live_routers(&self) -> usize {
        self.inner.live_routers()
    }

    /// Simulate the worker dying.
    pub fn kill_worker(&self) {
        self.inner.kill_worker();
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_router(
        &self,
        room_id: &RoomId,
        codecs: Vec<RtpCodec>,
        events: MediaEventSender,
    ) -> Result<Box<dyn MediaRouter>, MediaError> {
        if let Some(delay) = self.faults.router_delay() {
            tokio::time::sleep(delay).await;
        }
        if self.faults.fail_create_router.load(Ordering::SeqCst) {
            return Err(MediaError::Engine("injected router failure".to_string()));
        }

        let inner = self.inner.create_router(room_id, codecs, events).await?;
        self.faults.routers_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockRouter {
            inner,
            faults: Arc::clone(&self.faults),
        }))
    }

    async fn worker_died(&self) {
        self.inner.worker_died().await;
    }

    fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }
}

/// Router that consults the shared faults before delegating.
struct MockRouter {
    inner: Box<dyn MediaRouter>,
    faults: Arc<MediaFaults>,
}

#[async_trait]
impl MediaRouter for MockRouter {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.inner.rtp_capabilities()
    }

    async fn can_consume(&self, producer_id: &str, caps: &RtpCapabilities) -> bool {
        if self.faults.reject_consume.load(Ordering::SeqCst) {
            return false;
        }
        self.inner.can_consume(producer_id, caps).await
    }

    async fn create_transport(
        &self,
        options: &TransportOptions,
    ) -> Result<TransportParams, MediaError> {
        if self.faults.fail_create_transport.load(Ordering::SeqCst) {
            return Err(MediaError::Engine("injected transport failure".to_string()));
        }
        self.inner.create_transport(options).await
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        remote_parameters: &Value,
    ) -> Result<(), MediaError> {
        self.inner
            .connect_transport(transport_id, remote_parameters)
            .await
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: AppData,
    ) -> Result<String, MediaError> {
        if self.faults.fail_produce.load(Ordering::SeqCst) {
            return Err(MediaError::Engine("injected produce failure".to_string()));
        }
        self.inner
            .produce(transport_id, kind, rtp_parameters, app_data)
            .await
    }

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        caps: &RtpCapabilities,
        paused: bool,
    ) -> Result<ConsumerParams, MediaError> {
        self.inner
            .consume(transport_id, producer_id, caps, paused)
            .await
    }

    async fn resume_consumer(&self, consumer_id: &str) -> Result<(), MediaError> {
        self.inner.resume_consumer(consumer_id).await
    }

    async fn close_transport(&self, transport_id: &str) -> Result<(), MediaError> {
        self.inner.close_transport(transport_id).await
    }

    async fn close_producer(&self, producer_id: &str) -> Result<(), MediaError> {
        self.inner.close_producer(producer_id).await
    }

    async fn close_consumer(&self, consumer_id: &str) -> Result<(), MediaError> {
        self.inner.close_consumer(consumer_id).await
    }

    async fn close(&self) {
        if let Some(delay) = self.faults.close_delay() {
            tokio::time::sleep(delay).await;
        }
        self.inner.close().await;
    }
}

/// Builder for MockMediaEngine configuration.
#[derive(Debug)]
pub struct MockMediaEngineBuilder {
    min_port: u16,
    max_port: u16,
    faults: MediaFaults,
}

impl Default for MockMediaEngineBuilder {
    fn default() -> Self {
        Self {
            min_port: 40000,
            max_port: 40999,
            faults: MediaFaults::default(),
        }
    }
}

impl MockMediaEngineBuilder {
    /// Set the port range transports are allocated from.
    #[must_use]
    pub fn ports(mut self, min_port: u16, max_port: u16) -> Self {
        self.min_port = min_port;
        self.max_port = max_port;
        self
    }

    /// Configure the engine to reject router creation.
    #[must_use]
    pub fn fail_create_router(self) -> Self {
        self.faults.fail_create_router.store(true, Ordering::SeqCst);
        self
    }

    /// Configure routers to reject transport creation.
    #[must_use]
    pub fn fail_create_transport(self) -> Self {
        self.faults.fail_create_transport.store(true, Ordering::SeqCst);
        self
    }

    /// Configure routers to reject every consume as undecodable.
    #[must_use]
    pub fn reject_consume(self) -> Self {
        self.faults.reject_consume.store(true, Ordering::SeqCst);
        self
    }

    /// Delay router creation by `delay`.
    #[must_use]
    pub fn with_router_delay(self, delay: Duration) -> Self {
        self.faults.set_router_delay(delay);
        self
    }

    /// Build the MockMediaEngine.
    #[must_use]
    pub fn build(self) -> MockMediaEngine {
        MockMediaEngine {
            inner: LocalMediaEngine::new(self.min_port, self.max_port),
            faults: Arc::new(self.faults),
        }
    }
}
