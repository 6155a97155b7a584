//! Persistence collaborator for chat groups, messages and notifications.

use super::models::{ChatGroup, ChatMessage, GroupMember, Notification};
use crate::errors::CoordinatorError;
use async_trait::async_trait;
use common::types::UserId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated.
    #[error("{0}")]
    Conflict(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("document encoding error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(reason) => CoordinatorError::Conflict(reason),
            other => CoordinatorError::Store(other.to_string()),
        }
    }
}

/// Document store used by the chat service.
///
/// Group names are unique and so is the (group, user) membership pair;
/// violating either fails with [`StoreError::Conflict`].
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_group(&self, group: &ChatGroup) -> Result<(), StoreError>;

    async fn find_group_by_name(&self, name: &str) -> Result<Option<ChatGroup>, StoreError>;

    async fn add_member(&self, member: &GroupMember) -> Result<(), StoreError>;

    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    async fn find_message(&self, id: &str) -> Result<Option<ChatMessage>, StoreError>;

    /// Returns whether a message was deleted.
    async fn delete_message(&self, id: &str) -> Result<bool, StoreError>;

    /// Messages of a group, oldest first.
    async fn list_messages(&self, group_id: &str) -> Result<Vec<ChatMessage>, StoreError>;

    async fn save_notification(&self, notification: &Notification) -> Result<(), StoreError>;

    /// Returns whether the notification existed.
    async fn mark_notification_read(&self, id: &str) -> Result<bool, StoreError>;

    /// Notifications for a receiver, oldest first.
    async fn list_notifications(&self, receiver_id: &UserId) -> Result<Vec<Notification>, StoreError>;

    /// Delete the oldest notification addressed to `receiver_id`, returning its id.
    async fn delete_notification_for_receiver(
        &self,
        receiver_id: &UserId,
    ) -> Result<Option<String>, StoreError>;

    /// Round-trip to the backend (readiness check).
    async fn ping(&self) -> Result<(), StoreError>;
}
