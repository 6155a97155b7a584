//! Persisted chat records.
//!
//! Documents are stored as camelCase JSON so the same shape is used on the wire
//! and in the store.

use chrono::{DateTime, Utc};
use common::types::UserId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    #[default]
    Group,
    Broadcast,
    WatchParty,
}

/// A named chat room. Names are unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_by: UserId,
    #[serde(default)]
    pub kind: GroupKind,
    pub created_at: DateTime<Utc>,
}

impl ChatGroup {
    #[must_use]
    pub fn new(name: String, description: String, created_by: UserId, kind: GroupKind) -> Self {
        Self {
            id: new_id(),
            name,
            description,
            created_by,
            kind,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    #[default]
    Member,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Joined,
    Left,
}

/// Membership of one user in one group. The (group, user) pair is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub group_id: String,
    pub user_id: UserId,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub joined_at: DateTime<Utc>,
}

impl GroupMember {
    #[must_use]
    pub fn new(group_id: String, user_id: UserId, role: MemberRole) -> Self {
        Self {
            group_id,
            user_id,
            role,
            status: MemberStatus::Joined,
            joined_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub group_id: String,
    pub sender_id: UserId,
    pub text: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// A new message with a server-assigned id and timestamp.
    #[must_use]
    pub fn new(group_id: String, sender_id: UserId, text: String, kind: MessageKind) -> Self {
        Self {
            id: new_id(),
            group_id,
            sender_id,
            text,
            kind,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Message,
    Like,
    Comment,
    Follow,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// A new unread notification.
    #[must_use]
    pub fn new(
        sender_id: UserId,
        receiver_id: UserId,
        message: String,
        kind: NotificationKind,
        link: Option<String>,
    ) -> Self {
        Self {
            id: new_id(),
            sender_id,
            receiver_id,
            message,
            kind,
            read: false,
            link,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_starts_unread() {
        let n = Notification::new(
            UserId::new("u1"),
            UserId::new("u2"),
            "hi".to_string(),
            NotificationKind::Like,
            None,
        );
        assert!(!n.read);

        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], json!("like"));
        assert_eq!(value["receiverId"], json!("u2"));
        assert!(value.get("link").is_none());
    }

    #[test]
    fn test_group_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(GroupKind::WatchParty).unwrap(),
            json!("watch_party")
        );
        let group: ChatGroup = serde_json::from_value(json!({
            "id": "g1",
            "name": "general",
            "createdBy": "u1",
            "createdAt": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(group.kind, GroupKind::Group);
        assert_eq!(group.description, "");
    }

    #[test]
    fn test_new_ids_are_unique() {
        let a = ChatMessage::new("g".into(), UserId::new("u"), "a".into(), MessageKind::Text);
        let b = ChatMessage::new("g".into(), UserId::new("u"), "b".into(), MessageKind::Text);
        assert_ne!(a.id, b.id);
    }
}
