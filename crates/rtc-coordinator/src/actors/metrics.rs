//! Actor metrics and mailbox monitoring.
//!
//! Mailbox depth thresholds:
//!
//! | Actor Type | Elevated above | Critical above |
//! |------------|----------------|----------------|
//! | Registry   | 100            | 500            |
//! | Room       | 100            | 500            |
//! | Connection | 50             | 200            |
//!
//! Level changes are logged once per transition, not per message. The
//! in-process counters drive the `rtc_rooms_active`, `rtc_peers_active` and
//! `rtc_actor_mailbox_depth` gauges.

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Depth bounds for one actor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxThresholds {
    pub elevated: usize,
    pub critical: usize,
}

/// Registry and room mailboxes.
pub const ROOM_THRESHOLDS: MailboxThresholds = MailboxThresholds {
    elevated: 100,
    critical: 500,
};

/// Connection mailboxes hold one client's requests and stay shallow.
pub const CONNECTION_THRESHOLDS: MailboxThresholds = MailboxThresholds {
    elevated: 50,
    critical: 200,
};

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `RoomRegistryActor` (singleton).
    Registry,
    /// `RoomActor` (one per live room).
    Room,
    /// `ConnectionActor` (one per client connection).
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn thresholds(&self) -> MailboxThresholds {
        match self {
            ActorType::Registry | ActorType::Room => ROOM_THRESHOLDS,
            ActorType::Connection => CONNECTION_THRESHOLDS,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MailboxLevel {
    Normal = 0,
    Elevated = 1,
    Critical = 2,
}

impl MailboxLevel {
    #[must_use]
    pub const fn classify(depth: usize, thresholds: MailboxThresholds) -> Self {
        if depth > thresholds.critical {
            MailboxLevel::Critical
        } else if depth > thresholds.elevated {
            MailboxLevel::Elevated
        } else {
            MailboxLevel::Normal
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            2 => MailboxLevel::Critical,
            1 => MailboxLevel::Elevated,
            _ => MailboxLevel::Normal,
        }
    }
}

/// Tracks in-flight messages of one actor and reports depth transitions.
///
/// The actor calls [`message_received`](Self::message_received) when it takes
/// a message and [`message_handled`](Self::message_handled) once it is done.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Room id or peer id.
    actor_id: String,
    depth: AtomicUsize,
    peak: AtomicUsize,
    handled: AtomicU64,
    level: AtomicU8,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            handled: AtomicU64::new(0),
            level: AtomicU8::new(MailboxLevel::Normal as u8),
        }
    }

    pub fn message_received(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(depth, Ordering::Relaxed);
        self.observe(depth);
    }

    pub fn message_handled(&self) {
        let depth = self.depth.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        self.handled.fetch_add(1, Ordering::Relaxed);
        self.observe(depth);
    }

    fn observe(&self, depth: usize) {
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), depth);

        let level = MailboxLevel::classify(depth, self.actor_type.thresholds());
        let previous = MailboxLevel::from_u8(self.level.swap(level as u8, Ordering::Relaxed));
        if level <= previous {
            return;
        }

        match level {
            MailboxLevel::Critical => warn!(
                target: "rtc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                "Mailbox depth critical"
            ),
            MailboxLevel::Elevated => debug!(
                target: "rtc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                "Mailbox depth elevated"
            ),
            MailboxLevel::Normal => {}
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn level(&self) -> MailboxLevel {
        MailboxLevel::from_u8(self.level.load(Ordering::Relaxed))
    }
}

/// A count of live things, mirrored to a gauge on every change.
#[derive(Debug, Default)]
struct LiveCount(AtomicUsize);

impl LiveCount {
    fn up(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn down(&self) -> usize {
        // Never wraps below zero, even if a decrement is reported twice.
        let previous = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Process-wide counters shared by every actor.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    rooms: LiveCount,
    peers: LiveCount,
    connections: LiveCount,
    panics: AtomicU64,
    messages: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        metrics::set_rooms_active(self.rooms.up());
    }

    pub fn room_removed(&self) {
        metrics::set_rooms_active(self.rooms.down());
    }

    pub fn peer_joined(&self) {
        metrics::set_peers_active(self.peers.up());
    }

    pub fn peer_left(&self) {
        metrics::set_peers_active(self.peers.down());
    }

    pub fn connection_created(&self) {
        self.connections.up();
    }

    pub fn connection_closed(&self) {
        self.connections.down();
    }

    /// A supervised actor task ended in a panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.panics.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "rtc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panicked"
        );
    }

    pub fn record_message_processed(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.get()
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.get()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.get()
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}
