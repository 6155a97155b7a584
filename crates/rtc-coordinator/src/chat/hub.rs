//! Subscriber channels for chat fan-out.
//!
//! A connection subscribes to any number of group channels (by group name)
//! and user channels (by user id). Delivery goes through each subscriber's
//! [`EventSink`], so a slow subscriber never blocks a publisher.

use crate::protocol::ServerEvent;
use crate::sink::EventSink;
use common::types::{PeerId, UserId};
use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::RwLock;
use tracing::debug;

type Channels<K> = HashMap<K, HashMap<PeerId, EventSink>>;

#[derive(Default)]
pub struct SubscriptionHub {
    groups: RwLock<Channels<String>>,
    users: RwLock<Channels<UserId>>,
}

impl SubscriptionHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe_group(&self, group_name: &str, sink: EventSink) {
        let mut groups = self.groups.write().await;
        groups
            .entry(group_name.to_string())
            .or_default()
            .insert(sink.peer_id(), sink);
    }

    pub async fn subscribe_user(&self, user_id: &UserId, sink: EventSink) {
        let mut users = self.users.write().await;
        users
            .entry(user_id.clone())
            .or_default()
            .insert(sink.peer_id(), sink);
    }

    /// Deliver to every subscriber of `group_name`. Returns the number reached.
    pub async fn publish_group(&self, group_name: &str, event: &ServerEvent) -> usize {
        let groups = self.groups.read().await;
        publish(groups.get(group_name), event)
    }

    /// Deliver to every connection subscribed to `user_id`. Returns the number reached.
    pub async fn publish_user(&self, user_id: &UserId, event: &ServerEvent) -> usize {
        let users = self.users.read().await;
        publish(users.get(user_id), event)
    }

    /// Drop every subscription held by `peer_id`.
    pub async fn unsubscribe(&self, peer_id: PeerId) {
        let groups = remove_peer(&mut *self.groups.write().await, peer_id);
        let users = remove_peer(&mut *self.users.write().await, peer_id);

        if groups + users > 0 {
            debug!(
                target: "rtc.chat",
                peer_id = %peer_id,
                groups,
                users,
                "Removed chat subscriptions"
            );
        }
    }

    pub async fn group_subscribers(&self, group_name: &str) -> usize {
        self.groups
            .read()
            .await
            .get(group_name)
            .map_or(0, HashMap::len)
    }

    pub async fn user_subscribers(&self, user_id: &UserId) -> usize {
        self.users.read().await.get(user_id).map_or(0, HashMap::len)
    }
}

fn publish(subscribers: Option<&HashMap<PeerId, EventSink>>, event: &ServerEvent) -> usize {
    subscribers.map_or(0, |subscribers| {
        subscribers
            .values()
            .filter(|sink| sink.deliver(event.clone()))
            .count()
    })
}

fn remove_peer<K: Eq + Hash>(channels: &mut Channels<K>, peer_id: PeerId) -> usize {
    let mut removed = 0;
    channels.retain(|_, subscribers| {
        if subscribers.remove(&peer_id).is_some() {
            removed += 1;
        }
        !subscribers.is_empty()
    });
    removed
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::protocol::ServerFrame;

    fn deleted(id: &str) -> ServerEvent {
        ServerEvent::MessageDeleted { id: id.to_string() }
    }

    #[tokio::test]
    async fn test_group_publish_reaches_all_subscribers() {
        let hub = SubscriptionHub::new();
        let (a, mut rx_a) = EventSink::channel(PeerId::new());
        let (b, mut rx_b) = EventSink::channel(PeerId::new());
        let (c, mut rx_c) = EventSink::channel(PeerId::new());

        hub.subscribe_group("general", a).await;
        hub.subscribe_group("general", b).await;
        hub.subscribe_group("random", c).await;

        assert_eq!(hub.publish_group("general", &deleted("m1")).await, 2);
        assert_eq!(rx_a.try_recv().unwrap(), ServerFrame::Event(deleted("m1")));
        assert_eq!(rx_b.try_recv().unwrap(), ServerFrame::Event(deleted("m1")));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resubscribe_does_not_duplicate() {
        let hub = SubscriptionHub::new();
        let (sink, mut rx) = EventSink::channel(PeerId::new());

        hub.subscribe_group("general", sink.clone()).await;
        hub.subscribe_group("general", sink).await;

        assert_eq!(hub.publish_group("general", &deleted("m1")).await, 1);
        rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_user_channel_spans_connections() {
        let hub = SubscriptionHub::new();
        let user = UserId::new("u1");
        let (phone, mut rx_phone) = EventSink::channel(PeerId::new());
        let (laptop, mut rx_laptop) = EventSink::channel(PeerId::new());

        hub.subscribe_user(&user, phone).await;
        hub.subscribe_user(&user, laptop).await;

        assert_eq!(hub.publish_user(&user, &deleted("n1")).await, 2);
        rx_phone.try_recv().unwrap();
        rx_laptop.try_recv().unwrap();
        assert_eq!(hub.publish_user(&UserId::new("u2"), &deleted("n1")).await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_every_channel() {
        let hub = SubscriptionHub::new();
        let peer_id = PeerId::new();
        let (sink, _rx) = EventSink::channel(peer_id);
        let user = UserId::new("u1");

        hub.subscribe_group("general", sink.clone()).await;
        hub.subscribe_group("random", sink.clone()).await;
        hub.subscribe_user(&user, sink).await;

        hub.unsubscribe(peer_id).await;
        assert_eq!(hub.group_subscribers("general").await, 0);
        assert_eq!(hub.group_subscribers("random").await, 0);
        assert_eq!(hub.user_subscribers(&user).await, 0);

        // Second call is a no-op.
        hub.unsubscribe(peer_id).await;
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_not_counted() {
        let hub = SubscriptionHub::new();
        let (sink, rx) = EventSink::channel(PeerId::new());
        hub.subscribe_group("general", sink).await;
        drop(rx);

        assert_eq!(hub.publish_group("general", &deleted("m1")).await, 0);
    }
}
