//! Chat & notification fan-out.
//!
//! Every write is persisted first and broadcast only after the store
//! confirmed it; a failed write produces no broadcast. Store calls are bounded
//! by the configured store timeout.

use super::hub::SubscriptionHub;
use super::models::{ChatGroup, ChatMessage, GroupKind, GroupMember, MemberRole, Notification};
use super::store::{ChatStore, StoreError};
use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::protocol::{
    MessageAck, NotificationAck, SendMessageRequest, SendNotificationRequest, ServerEvent,
};
use crate::sink::EventSink;
use common::types::{PeerId, UserId};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

pub struct ChatService {
    store: Arc<dyn ChatStore>,
    hub: SubscriptionHub,
    store_timeout: Duration,
}

impl ChatService {
    #[must_use]
    pub fn new(store: Arc<dyn ChatStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            hub: SubscriptionHub::new(),
            store_timeout,
        }
    }

    #[must_use]
    pub fn hub(&self) -> &SubscriptionHub {
        &self.hub
    }

    /// Run a store call under the configured deadline.
    async fn store_call<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, CoordinatorError> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.store_timeout, call).await;
        metrics::record_store_latency(operation, start.elapsed());

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(
                    target: "rtc.chat",
                    operation,
                    error = %e,
                    "Store call failed"
                );
                Err(e.into())
            }
            Err(_) => {
                warn!(
                    target: "rtc.chat",
                    operation,
                    "Store call timed out"
                );
                Err(CoordinatorError::Timeout(operation.to_string()))
            }
        }
    }

    async fn require_group(&self, name: &str) -> Result<ChatGroup, CoordinatorError> {
        self.store_call("find_group", self.store.find_group_by_name(name))
            .await?
            .ok_or_else(|| CoordinatorError::GroupNotFound(name.to_string()))
    }

    /// Subscribe a connection to a group's broadcasts.
    #[instrument(skip_all, fields(group = %room_name, peer_id = %sink.peer_id()))]
    pub async fn join_group(&self, room_name: &str, sink: EventSink) -> Result<(), CoordinatorError> {
        self.require_group(room_name).await?;
        self.hub.subscribe_group(room_name, sink).await;
        debug!(target: "rtc.chat", group = %room_name, "Joined group channel");
        Ok(())
    }

    /// Persist a message, then broadcast it to the group.
    #[instrument(skip_all, fields(group = %request.room_name))]
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<MessageAck, CoordinatorError> {
        if request.text.trim().is_empty() {
            return Err(CoordinatorError::InvalidPayload(
                "message text must not be empty".to_string(),
            ));
        }

        let group = self.require_group(&request.room_name).await?;
        let message = ChatMessage::new(
            group.id,
            request.sender_info.id.clone(),
            request.text,
            request.kind,
        );
        self.store_call("save_message", self.store.save_message(&message))
            .await?;

        let event = ServerEvent::message_received(&message, &request.room_name, request.sender_info);
        let reached = self.hub.publish_group(&request.room_name, &event).await;

        debug!(
            target: "rtc.chat",
            message_id = %message.id,
            reached,
            "Message broadcast"
        );

        Ok(MessageAck {
            id: message.id,
            created_at: message.created_at,
        })
    }

    /// Delete a message, then broadcast its id to the group.
    ///
    /// The message must belong to `room_name`; otherwise it is reported as not
    /// found and nothing is deleted.
    #[instrument(skip_all, fields(message_id = %id, group = %room_name))]
    pub async fn delete_message(&self, id: &str, room_name: &str) -> Result<(), CoordinatorError> {
        let existing = self
            .store_call("find_message", self.store.find_message(id))
            .await?;
        let Some(message) = existing else {
            return Err(CoordinatorError::MessageNotFound(id.to_string()));
        };
        let group = self
            .store_call("find_group", self.store.find_group_by_name(room_name))
            .await?;
        if !matches!(group, Some(group) if group.id == message.group_id) {
            return Err(CoordinatorError::MessageNotFound(id.to_string()));
        }

        let deleted = self
            .store_call("delete_message", self.store.delete_message(id))
            .await?;
        if !deleted {
            // Lost a race with another delete; that one broadcast already.
            return Err(CoordinatorError::MessageNotFound(id.to_string()));
        }

        self.hub
            .publish_group(room_name, &ServerEvent::MessageDeleted { id: id.to_string() })
            .await;
        Ok(())
    }

    /// Persist a notification, then deliver it to the receiver's channel.
    #[instrument(skip_all, fields(receiver_id = %request.receiver_id))]
    pub async fn send_notification(
        &self,
        request: SendNotificationRequest,
    ) -> Result<NotificationAck, CoordinatorError> {
        let notification = Notification::new(
            request.sender_id,
            request.receiver_id,
            request.message,
            request.kind,
            request.link,
        );
        self.store_call("save_notification", self.store.save_notification(&notification))
            .await?;

        let id = notification.id.clone();
        let receiver_id = notification.receiver_id.clone();
        self.hub
            .publish_user(&receiver_id, &ServerEvent::NotificationReceived { notification })
            .await;

        Ok(NotificationAck { id })
    }

    pub async fn mark_read(&self, id: &str) -> Result<(), CoordinatorError> {
        let updated = self
            .store_call("mark_read", self.store.mark_notification_read(id))
            .await?;
        if updated {
            Ok(())
        } else {
            Err(CoordinatorError::NotificationNotFound(id.to_string()))
        }
    }

    /// Subscribe a connection to a user's personal channel.
    pub async fn join_user_channel(&self, user_id: &UserId, sink: EventSink) {
        self.hub.subscribe_user(user_id, sink).await;
    }

    /// Drop every subscription of a closed connection.
    pub async fn disconnect(&self, peer_id: PeerId) {
        self.hub.unsubscribe(peer_id).await;
    }

    #[instrument(skip_all, fields(group = %name))]
    pub async fn create_group(
        &self,
        name: String,
        description: String,
        created_by: UserId,
        kind: GroupKind,
    ) -> Result<ChatGroup, CoordinatorError> {
        if name.trim().is_empty() {
            return Err(CoordinatorError::InvalidPayload(
                "group name must not be empty".to_string(),
            ));
        }

        let group = ChatGroup::new(name, description, created_by, kind);
        self.store_call("create_group", self.store.create_group(&group))
            .await?;

        info!(
            target: "rtc.chat",
            group_id = %group.id,
            group = %group.name,
            "Group created"
        );
        Ok(group)
    }

    pub async fn add_member(
        &self,
        group_name: &str,
        user_id: UserId,
        role: MemberRole,
    ) -> Result<GroupMember, CoordinatorError> {
        let group = self.require_group(group_name).await?;
        let member = GroupMember::new(group.id, user_id, role);
        self.store_call("add_member", self.store.add_member(&member))
            .await?;
        Ok(member)
    }

    /// Group history, oldest first.
    pub async fn list_messages(&self, group_name: &str) -> Result<Vec<ChatMessage>, CoordinatorError> {
        let group = self.require_group(group_name).await?;
        let mut messages = self
            .store_call("list_messages", self.store.list_messages(&group.id))
            .await?;
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    pub async fn list_notifications(
        &self,
        receiver_id: &UserId,
    ) -> Result<Vec<Notification>, CoordinatorError> {
        self.store_call("list_notifications", self.store.list_notifications(receiver_id))
            .await
    }

    /// Delete one notification addressed to `receiver_id`; returns its id.
    pub async fn delete_notification(&self, receiver_id: &UserId) -> Result<String, CoordinatorError> {
        self.store_call(
            "delete_notification",
            self.store.delete_notification_for_receiver(receiver_id),
        )
        .await?
        .ok_or_else(|| CoordinatorError::NotificationNotFound(receiver_id.to_string()))
    }

    /// Whether the store answers within the deadline.
    pub async fn store_ready(&self) -> bool {
        self.store_call("ping", self.store.ping()).await.is_ok()
    }
}
