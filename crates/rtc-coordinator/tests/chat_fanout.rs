//! Chat and notification fan-out.
//!
//! Verifies:
//! - Messages are persisted, then broadcast to every group subscriber
//! - Deletions and notifications reach the right subscribers
//! - Store failures and timeouts produce no broadcast
//! - Uniqueness rules surface as conflicts

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::time::Duration;

use common::types::UserId;
use rtc_coordinator::chat::models::{GroupKind, MemberRole};
use rtc_coordinator::errors::CoordinatorError;
use rtc_coordinator::protocol::ServerEvent;
use rtc_test_utils::{MockChatStore, TestCoordinator, TestPeer};
use serde_json::{json, Value};

fn coordinator_with_group(name: &str) -> TestCoordinator {
    TestCoordinator::builder()
        .store(MockChatStore::builder().with_group(name).build())
        .build()
}

fn message(text: &str) -> Value {
    json!({
        "roomName": "general",
        "senderInfo": {"id": "alice", "name": "Alice"},
        "text": text,
    })
}

async fn subscribed(coordinator: &TestCoordinator) -> TestPeer {
    let mut peer = coordinator.connect();
    peer.request("join-group", json!({"roomName": "general"}))
        .await
        .unwrap();
    peer
}

// ============================================================================
// Group messages
// ============================================================================

#[tokio::test]
async fn test_message_reaches_every_subscriber() {
    let coordinator = coordinator_with_group("general");
    let mut alice = subscribed(&coordinator).await;
    let mut bob = subscribed(&coordinator).await;
    let mut outsider = coordinator.connect();

    let ack = alice.request("message", message("hello")).await.unwrap();
    let id = ack["id"].as_str().unwrap().to_string();
    assert!(ack["createdAt"].is_string());

    for peer in [&mut alice, &mut bob] {
        match peer.next_event().await {
            ServerEvent::MessageReceived {
                id: received,
                room_name,
                text,
                sender,
                ..
            } => {
                assert_eq!(received, id);
                assert_eq!(room_name, "general");
                assert_eq!(text, "hello");
                assert_eq!(sender.id, UserId::new("alice"));
                assert_eq!(sender.profile.get("name"), Some(&json!("Alice")));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    assert!(outsider.drain_events().is_empty());
    assert_eq!(coordinator.store.message_count(), 1);
}

#[tokio::test]
async fn test_join_unknown_group_is_not_found() {
    let coordinator = TestCoordinator::new();
    let mut alice = coordinator.connect();

    let err = alice
        .request("join-group", json!({"roomName": "nowhere"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, 4);
    assert_eq!(err.message, "Group not found");
}

#[tokio::test]
async fn test_empty_message_is_invalid() {
    let coordinator = coordinator_with_group("general");
    let mut alice = subscribed(&coordinator).await;

    let err = alice.request("message", message("   ")).await.unwrap_err();
    assert_eq!(err.code, 1);
    assert_eq!(coordinator.store.message_count(), 0);
}

#[tokio::test]
async fn test_store_failure_produces_no_broadcast() {
    let coordinator = coordinator_with_group("general");
    let mut alice = subscribed(&coordinator).await;
    let mut bob = subscribed(&coordinator).await;

    coordinator.store.set_failing(true);
    let err = alice.request("message", message("lost")).await.unwrap_err();
    assert_eq!(err.code, 6);
    assert_eq!(err.message, "An internal error occurred");

    assert!(alice.drain_events().is_empty());
    assert!(bob.drain_events().is_empty());
}

#[tokio::test]
async fn test_failed_send_without_ack_id_reports_message_error() {
    let coordinator = coordinator_with_group("general");
    let mut alice = subscribed(&coordinator).await;

    coordinator.store.set_failing(true);
    alice.send("message", message("lost")).await;

    match alice.next_event().await {
        ServerEvent::MessageError { room_name, error } => {
            assert_eq!(room_name, "general");
            assert_eq!(error.code, 6);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_store_times_out() {
    let store = MockChatStore::builder()
        .with_group("general")
        .with_delay(Duration::from_millis(200))
        .build();
    let coordinator = TestCoordinator::builder()
        .store(store)
        .store_timeout(Duration::from_millis(20))
        .build();
    let mut alice = coordinator.connect();

    let err = alice
        .request("join-group", json!({"roomName": "general"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, 6);
    assert_eq!(err.message, "Upstream request timed out");
}

#[tokio::test]
async fn test_delete_broadcasts_message_id() {
    let coordinator = coordinator_with_group("general");
    let mut alice = subscribed(&coordinator).await;
    let mut bob = subscribed(&coordinator).await;

    let ack = alice.request("message", message("oops")).await.unwrap();
    let id = ack["id"].as_str().unwrap().to_string();
    alice.drain_events();
    bob.next_event().await;

    alice
        .request("message-delete", json!({"id": id, "roomName": "general"}))
        .await
        .unwrap();

    assert_eq!(bob.next_event().await, ServerEvent::MessageDeleted { id: id.clone() });
    assert_eq!(coordinator.store.message_count(), 0);

    let err = alice
        .request("message-delete", json!({"id": id, "roomName": "general"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, 4);
}

#[tokio::test]
async fn test_delete_through_another_group_is_not_found() {
    let coordinator = TestCoordinator::builder()
        .store(
            MockChatStore::builder()
                .with_group("general")
                .with_group("random")
                .build(),
        )
        .build();
    let mut alice = subscribed(&coordinator).await;
    let mut carol = coordinator.connect();
    carol
        .request("join-group", json!({"roomName": "random"}))
        .await
        .unwrap();

    let ack = alice.request("message", message("stays")).await.unwrap();
    let id = ack["id"].as_str().unwrap().to_string();

    let err = alice
        .request("message-delete", json!({"id": id, "roomName": "random"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, 4);
    assert_eq!(coordinator.store.message_count(), 1);
    assert!(!carol
        .drain_events()
        .iter()
        .any(|e| matches!(e, ServerEvent::MessageDeleted { .. })));
}

#[tokio::test]
async fn test_closed_connection_stops_receiving() {
    let coordinator = coordinator_with_group("general");
    let mut alice = subscribed(&coordinator).await;
    let bob = subscribed(&coordinator).await;
    assert_eq!(coordinator.chat.hub().group_subscribers("general").await, 2);

    bob.close().await;
    assert_eq!(coordinator.chat.hub().group_subscribers("general").await, 1);

    alice.request("message", message("anyone?")).await.unwrap();
    assert!(matches!(
        alice.next_event().await,
        ServerEvent::MessageReceived { .. }
    ));
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_notification_reaches_receiver_channel_only() {
    let coordinator = TestCoordinator::new();
    let mut bob = coordinator.connect();
    bob.request("join-user-channel", json!({"userId": "bob"}))
        .await
        .unwrap();
    let mut carol = coordinator.connect();
    carol
        .request("join-user-channel", json!({"userId": "carol"}))
        .await
        .unwrap();
    let mut alice = coordinator.connect();

    let ack = alice
        .request(
            "send-notification",
            json!({
                "senderId": "alice",
                "receiverId": "bob",
                "message": "liked your post",
                "type": "like",
                "link": "/posts/1",
            }),
        )
        .await
        .unwrap();
    let id = ack["id"].as_str().unwrap().to_string();

    match bob.next_event().await {
        ServerEvent::NotificationReceived { notification } => {
            assert_eq!(notification.id, id);
            assert_eq!(notification.sender_id, UserId::new("alice"));
            assert_eq!(notification.link.as_deref(), Some("/posts/1"));
            assert!(!notification.read);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(carol.drain_events().is_empty());
    assert!(alice.drain_events().is_empty());

    bob.request("mark-read", json!({"id": id})).await.unwrap();
    assert!(coordinator.store.notification(&id).unwrap().read);

    let err = bob
        .request("mark-read", json!({"id": "missing"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, 4);
}

#[tokio::test]
async fn test_notification_store_failure_reaches_no_one() {
    let coordinator = TestCoordinator::new();
    let mut bob = coordinator.connect();
    bob.request("join-user-channel", json!({"userId": "bob"}))
        .await
        .unwrap();
    let mut alice = coordinator.connect();

    coordinator.store.set_failing(true);
    let err = alice
        .request(
            "send-notification",
            json!({
                "senderId": "alice",
                "receiverId": "bob",
                "message": "liked your post",
                "type": "like",
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, 6);

    // Give a stray broadcast a chance to show up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!bob
        .drain_events()
        .iter()
        .any(|e| matches!(e, ServerEvent::NotificationReceived { .. })));
    assert_eq!(coordinator.store.notification_count(), 0);
}

#[tokio::test]
async fn test_delete_notification_removes_oldest_for_receiver() {
    let coordinator = TestCoordinator::new();
    let mut alice = coordinator.connect();
    let mut ids = Vec::new();
    for text in ["first", "second"] {
        let ack = alice
            .request(
                "send-notification",
                json!({"senderId": "alice", "receiverId": "bob", "message": text, "type": "message"}),
            )
            .await
            .unwrap();
        ids.push(ack["id"].as_str().unwrap().to_string());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let bob = UserId::new("bob");
    let deleted = coordinator.chat.delete_notification(&bob).await.unwrap();
    assert_eq!(deleted, ids[0]);

    let remaining = coordinator.chat.list_notifications(&bob).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, ids[1]);

    coordinator.chat.delete_notification(&bob).await.unwrap();
    let err = coordinator.chat.delete_notification(&bob).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NotificationNotFound(_)));
}

// ============================================================================
// Groups and membership
// ============================================================================

#[tokio::test]
async fn test_group_names_and_memberships_are_unique() {
    let coordinator = TestCoordinator::new();
    let chat = &coordinator.chat;

    chat.create_group(
        "movies".to_string(),
        "Friday nights".to_string(),
        UserId::new("alice"),
        GroupKind::WatchParty,
    )
    .await
    .unwrap();
    let err = chat
        .create_group(
            "movies".to_string(),
            String::new(),
            UserId::new("bob"),
            GroupKind::Group,
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), 5);

    chat.add_member("movies", UserId::new("bob"), MemberRole::Member)
        .await
        .unwrap();
    let err = chat
        .add_member("movies", UserId::new("bob"), MemberRole::Admin)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), 5);

    let err = chat
        .add_member("nowhere", UserId::new("bob"), MemberRole::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::GroupNotFound(_)));
}

#[tokio::test]
async fn test_history_is_oldest_first() {
    let coordinator = coordinator_with_group("general");
    let mut alice = coordinator.connect();
    for text in ["one", "two", "three"] {
        alice.request("message", message(text)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let history = coordinator.chat.list_messages("general").await.unwrap();
    let texts: Vec<&str> = history.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["one", "two", "three"]);
}
