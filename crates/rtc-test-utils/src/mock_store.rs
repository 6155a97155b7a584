//! In-memory chat store for coordinator testing.
//!
//! Enforces the same uniqueness rules as the Redis store (group names and
//! membership pairs) and can be configured to:
//! - Fail every call with a backend error
//! - Fail only the next N calls
//! - Answer slowly, to exercise store timeouts
//!
//! # Example
//!
//! ```rust,ignore
//! use rtc_test_utils::MockChatStore;
//!
//! let store = MockChatStore::builder()
//!     .with_group("general")
//!     .with_delay(Duration::from_millis(50))
//!     .build();
//!
//! let chat = ChatService::new(Arc::new(store.clone()), Duration::from_secs(1));
//! // ... drive the service ...
//! assert_eq!(store.message_count(), 1);
//! ```

use async_trait::async_trait;
use common::types::UserId;
use rtc_coordinator::chat::models::{
    ChatGroup, ChatMessage, GroupKind, GroupMember, Notification,
};
use rtc_coordinator::chat::{ChatStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct StoreState {
    groups: HashMap<String, ChatGroup>,
    members: Vec<GroupMember>,
    messages: HashMap<String, ChatMessage>,
    notifications: HashMap<String, Notification>,
    fail_all: bool,
    fail_next: usize,
    calls: usize,
}

/// Shared in-memory [`ChatStore`]. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct MockChatStore {
    state: Arc<Mutex<StoreState>>,
    delay: Option<Duration>,
}

impl MockChatStore {
    /// Create an empty store with no injected failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new MockChatStore builder.
    #[must_use]
    pub fn builder() -> MockChatStoreBuilder {
        MockChatStoreBuilder::default()
    }

    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().fail_all = failing;
    }

    /// Fail the next `count` calls, then recover.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().fail_next = count;
    }

    /// Number of store calls made so far, failed ones included.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.state.lock().unwrap().groups.len()
    }

    #[must_use]
    pub fn member_count(&self, group_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .members
            .iter()
            .filter(|m| m.group_id == group_id)
            .count()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    #[must_use]
    pub fn notification_count(&self) -> usize {
        self.state.lock().unwrap().notifications.len()
    }

    /// Look up a stored group by name.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<ChatGroup> {
        self.state.lock().unwrap().groups.get(name).cloned()
    }

    /// Look up a stored notification by id.
    #[must_use]
    pub fn notification(&self, id: &str) -> Option<Notification> {
        self.state.lock().unwrap().notifications.get(id).cloned()
    }

    /// Insert a group directly, bypassing uniqueness checks and failure injection.
    pub fn insert_group(&self, group: ChatGroup) {
        self.state
            .lock()
            .unwrap()
            .groups
            .insert(group.name.clone(), group);
    }

    /// Apply the configured delay, count the call and decide whether it fails.
    async fn begin(&self, operation: &str) -> Result<(), StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls += 1;
        if state.fail_all {
            return Err(StoreError::Backend(format!("injected failure: {operation}")));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(StoreError::Backend(format!("injected failure: {operation}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatStore for MockChatStore {
    async fn create_group(&self, group: &ChatGroup) -> Result<(), StoreError> {
        self.begin("create_group").await?;
        let mut state = self.state.lock().unwrap();
        if state.groups.contains_key(&group.name) {
            return Err(StoreError::Conflict(format!(
                "group '{}' already exists",
                group.name
            )));
        }
        state.groups.insert(group.name.clone(), group.clone());
        Ok(())
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<ChatGroup>, StoreError> {
        self.begin("find_group").await?;
        Ok(self.state.lock().unwrap().groups.get(name).cloned())
    }

    async fn add_member(&self, member: &GroupMember) -> Result<(), StoreError> {
        self.begin("add_member").await?;
        let mut state = self.state.lock().unwrap();
        let duplicate = state
            .members
            .iter()
            .any(|m| m.group_id == member.group_id && m.user_id == member.user_id);
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "user '{}' is already a member",
                member.user_id
            )));
        }
        state.members.push(member.clone());
        Ok(())
    }

    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.begin("save_message").await?;
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn find_message(&self, id: &str) -> Result<Option<ChatMessage>, StoreError> {
        self.begin("find_message").await?;
        Ok(self.state.lock().unwrap().messages.get(id).cloned())
    }

    async fn delete_message(&self, id: &str) -> Result<bool, StoreError> {
        self.begin("delete_message").await?;
        Ok(self.state.lock().unwrap().messages.remove(id).is_some())
    }

    async fn list_messages(&self, group_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        self.begin("list_messages").await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .values()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn save_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        self.begin("save_notification").await?;
        self.state
            .lock()
            .unwrap()
            .notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn mark_notification_read(&self, id: &str) -> Result<bool, StoreError> {
        self.begin("mark_read").await?;
        match self.state.lock().unwrap().notifications.get_mut(id) {
            Some(notification) => {
                notification.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_notifications(&self, receiver_id: &UserId) -> Result<Vec<Notification>, StoreError> {
        self.begin("list_notifications").await?;
        let mut found: Vec<Notification> = self
            .state
            .lock()
            .unwrap()
            .notifications
            .values()
            .filter(|n| &n.receiver_id == receiver_id)
            .cloned()
            .collect();
        found.sort_by_key(|n| n.created_at);
        Ok(found)
    }

    async fn delete_notification_for_receiver(
        &self,
        receiver_id: &UserId,
    ) -> Result<Option<String>, StoreError> {
        self.begin("delete_notification").await?;
        let mut state = self.state.lock().unwrap();
        let oldest = state
            .notifications
            .values()
            .filter(|n| &n.receiver_id == receiver_id)
            .min_by_key(|n| n.created_at)
            .map(|n| n.id.clone());
        if let Some(id) = &oldest {
            state.notifications.remove(id);
        }
        Ok(oldest)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.begin("ping").await
    }
}

/// Builder for MockChatStore configuration.
#[derive(Debug, Default)]
pub struct MockChatStoreBuilder {
    groups: Vec<ChatGroup>,
    delay: Option<Duration>,
    failing: bool,
}

impl MockChatStoreBuilder {
    /// Seed a plain group created by `test-admin`.
    #[must_use]
    pub fn with_group(mut self, name: &str) -> Self {
        self.groups.push(ChatGroup::new(
            name.to_string(),
            String::new(),
            UserId::new("test-admin"),
            GroupKind::Group,
        ));
        self
    }

    /// Delay every call by `delay` before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Start with every call failing.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Build the MockChatStore.
    #[must_use]
    pub fn build(self) -> MockChatStore {
        let store = MockChatStore {
            state: Arc::new(Mutex::new(StoreState {
                fail_all: self.failing,
                ..StoreState::default()
            })),
            delay: self.delay,
        };
        for group in self.groups {
            store.insert_group(group);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_coordinator::chat::models::{MemberRole, MessageKind};

    #[tokio::test]
    async fn test_group_names_are_unique() {
        let store = MockChatStore::builder().with_group("general").build();
        let duplicate = ChatGroup::new(
            "general".to_string(),
            String::new(),
            UserId::new("bob"),
            GroupKind::Group,
        );

        let result = store.create_group(&duplicate).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(store.group_count(), 1);
    }

    #[tokio::test]
    async fn test_membership_pairs_are_unique() {
        let store = MockChatStore::builder().with_group("general").build();
        let group = store.group("general").unwrap();
        let member = GroupMember::new(group.id.clone(), UserId::new("alice"), MemberRole::Member);

        store.add_member(&member).await.unwrap();
        let again = GroupMember::new(group.id.clone(), UserId::new("alice"), MemberRole::Admin);
        assert!(matches!(
            store.add_member(&again).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.member_count(&group.id), 1);
    }

    #[tokio::test]
    async fn test_fail_next_recovers() {
        let store = MockChatStore::new();
        store.fail_next(1);

        assert!(matches!(store.ping().await, Err(StoreError::Backend(_))));
        assert!(store.ping().await.is_ok());
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn test_delete_message_reports_presence() {
        let store = MockChatStore::new();
        let message = ChatMessage::new(
            "g1".to_string(),
            UserId::new("alice"),
            "hi".to_string(),
            MessageKind::Text,
        );
        store.save_message(&message).await.unwrap();

        assert!(store.delete_message(&message.id).await.unwrap());
        assert!(!store.delete_message(&message.id).await.unwrap());
    }
}
