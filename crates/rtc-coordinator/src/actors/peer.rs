//! Per-peer media state held by a room.
//!
//! Only ids and tags are kept here; the live resources belong to the media
//! router. Entries are removed when the router reports closure, so every id in
//! these maps refers to a live resource.

use crate::media::{AppData, Direction, MediaKind};
use crate::sink::EventSink;
use common::types::PeerId;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEntry {
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProducerEntry {
    pub transport_id: String,
    pub kind: MediaKind,
    pub app_data: AppData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerEntry {
    pub transport_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
}

/// A joined peer.
#[derive(Debug)]
pub struct PeerSession {
    pub peer_id: PeerId,
    pub user_metadata: Value,
    pub sink: EventSink,
    pub transports: HashMap<String, TransportEntry>,
    pub producers: HashMap<String, ProducerEntry>,
    pub consumers: HashMap<String, ConsumerEntry>,
}

impl PeerSession {
    #[must_use]
    pub fn new(peer_id: PeerId, user_metadata: Value, sink: EventSink) -> Self {
        Self {
            peer_id,
            user_metadata,
            sink,
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    /// The peer's receive transport, if any. At most one exists at a time.
    #[must_use]
    pub fn recv_transport(&self) -> Option<&str> {
        self.transports
            .iter()
            .find(|(_, t)| t.direction == Direction::Recv)
            .map(|(id, _)| id.as_str())
    }

    /// Ids of the peer's screen-tagged producers.
    #[must_use]
    pub fn screen_producers(&self) -> Vec<String> {
        self.producers
            .iter()
            .filter(|(_, p)| p.app_data.is_screen)
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub fn has_screen_producer(&self) -> bool {
        self.producers.values().any(|p| p.app_data.is_screen)
    }

    /// Remove a consumer. Returns its entry if it was present.
    pub fn take_consumer(&mut self, consumer_id: &str) -> Option<ConsumerEntry> {
        self.consumers.remove(consumer_id)
    }

    /// Remove a transport and every producer and consumer created on it.
    /// Returns the removed consumers so the caller can notify the peer.
    pub fn take_transport(&mut self, transport_id: &str) -> Vec<(String, ConsumerEntry)> {
        if self.transports.remove(transport_id).is_none() {
            return Vec::new();
        }
        self.producers.retain(|_, p| p.transport_id != transport_id);

        let (gone, kept): (HashMap<_, _>, HashMap<_, _>) = self
            .consumers
            .drain()
            .partition(|(_, c)| c.transport_id == transport_id);
        self.consumers = kept;
        gone.into_iter().collect()
    }

    #[must_use]
    pub fn resource_counts(&self) -> (usize, usize, usize) {
        (
            self.transports.len(),
            self.producers.len(),
            self.consumers.len(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> PeerSession {
        let peer_id = PeerId::new();
        let (sink, _rx) = EventSink::channel(peer_id);
        PeerSession::new(peer_id, json!({"name": "ada"}), sink)
    }

    #[test]
    fn test_recv_transport_lookup() {
        let mut peer = session();
        assert!(peer.recv_transport().is_none());

        peer.transports.insert(
            "send-1".to_string(),
            TransportEntry {
                direction: Direction::Send,
            },
        );
        peer.transports.insert(
            "recv-1".to_string(),
            TransportEntry {
                direction: Direction::Recv,
            },
        );
        assert_eq!(peer.recv_transport(), Some("recv-1"));
    }

    #[test]
    fn test_take_transport_removes_dependents() {
        let mut peer = session();
        peer.transports.insert(
            "send-1".to_string(),
            TransportEntry {
                direction: Direction::Send,
            },
        );
        peer.transports.insert(
            "recv-1".to_string(),
            TransportEntry {
                direction: Direction::Recv,
            },
        );
        peer.producers.insert(
            "p1".to_string(),
            ProducerEntry {
                transport_id: "send-1".to_string(),
                kind: MediaKind::Video,
                app_data: AppData::screen(),
            },
        );
        peer.consumers.insert(
            "c1".to_string(),
            ConsumerEntry {
                transport_id: "recv-1".to_string(),
                producer_id: "remote".to_string(),
                kind: MediaKind::Audio,
            },
        );

        assert!(peer.has_screen_producer());
        assert_eq!(peer.screen_producers(), vec!["p1".to_string()]);

        let removed = peer.take_transport("recv-1");
        assert_eq!(removed.len(), 1);
        assert_eq!(peer.resource_counts(), (1, 1, 0));

        assert!(peer.take_transport("recv-1").is_empty());

        peer.take_transport("send-1");
        assert_eq!(peer.resource_counts(), (0, 0, 0));
        assert!(!peer.has_screen_producer());
    }
}
