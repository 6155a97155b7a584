//! Screen-share token behavior across peers.
//!
//! At most one peer per room holds the token. It is taken by the first
//! screen-tagged produce and given back by `stop-screen-share`, by a failed
//! produce, or by the holder leaving.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::sync::atomic::Ordering;

use rtc_coordinator::errors::SCREEN_SHARE_BUSY;
use rtc_coordinator::protocol::ServerEvent;
use rtc_test_utils::{TestCoordinator, TestPeer};
use serde_json::json;

async fn joined_pair(coordinator: &TestCoordinator) -> (TestPeer, TestPeer) {
    let mut alice = coordinator.connect();
    let mut bob = coordinator.connect();
    alice.join_room("R1").await;
    bob.join_room("R1").await;
    (alice, bob)
}

#[tokio::test]
async fn test_first_screen_producer_takes_the_token() {
    let coordinator = TestCoordinator::new();
    let (mut alice, mut bob) = joined_pair(&coordinator).await;

    let send = alice.create_transport("send").await;
    alice.produce(&send, "video", true).await.unwrap();

    let started = bob
        .wait_for(|e| matches!(e, ServerEvent::ScreenShareStarted { .. }))
        .await;
    assert_eq!(
        started,
        ServerEvent::ScreenShareStarted {
            peer_id: alice.peer_id
        }
    );
    // The holder is told too.
    alice
        .wait_for(|e| matches!(e, ServerEvent::ScreenShareStarted { .. }))
        .await;

    let state = coordinator.room_state("R1").await.unwrap();
    assert_eq!(state.screen_share_holder, Some(alice.peer_id));

    let mut carol = coordinator.connect();
    let ack = carol.join_room("R1").await;
    assert_eq!(ack["screenSharingPeer"], json!(alice.peer_id));
}

#[tokio::test]
async fn test_second_sharer_is_rejected_with_busy_message() {
    let coordinator = TestCoordinator::new();
    let (mut alice, mut bob) = joined_pair(&coordinator).await;

    let alice_send = alice.create_transport("send").await;
    alice.produce(&alice_send, "video", true).await.unwrap();

    let bob_send = bob.create_transport("send").await;
    let err = bob.produce(&bob_send, "video", true).await.unwrap_err();
    assert_eq!(err.code, 5);
    assert_eq!(err.message, SCREEN_SHARE_BUSY);

    // Camera tracks are unaffected by the token.
    bob.produce(&bob_send, "video", false).await.unwrap();

    let state = coordinator.room_state("R1").await.unwrap();
    assert_eq!(state.screen_share_holder, Some(alice.peer_id));
    assert_eq!(state.producer_count, 2);
}

#[tokio::test]
async fn test_holder_may_add_more_screen_tracks() {
    let coordinator = TestCoordinator::new();
    let (mut alice, _bob) = joined_pair(&coordinator).await;

    let send = alice.create_transport("send").await;
    alice.produce(&send, "video", true).await.unwrap();
    alice.produce(&send, "audio", true).await.unwrap();

    let state = coordinator.room_state("R1").await.unwrap();
    assert_eq!(state.producer_count, 2);
}

#[tokio::test]
async fn test_stop_closes_screen_producers_and_frees_the_token() {
    let coordinator = TestCoordinator::new();
    let (mut alice, mut bob) = joined_pair(&coordinator).await;

    let send = alice.create_transport("send").await;
    let camera = alice.produce(&send, "video", false).await.unwrap();
    let screen = alice.produce(&send, "video", true).await.unwrap();

    bob.create_transport("recv").await;
    let consumed = bob.consume(&screen).await.unwrap();

    let ack = alice
        .request("stop-screen-share", json!({}))
        .await
        .unwrap();
    assert_eq!(ack, json!({"stopped": true}));

    bob.wait_for(|e| {
        matches!(e, ServerEvent::ScreenShareStopped { peer_id } if *peer_id == alice.peer_id)
    })
    .await;
    let closed = bob
        .wait_for(|e| matches!(e, ServerEvent::ConsumerClosed { .. }))
        .await;
    assert_eq!(
        closed,
        ServerEvent::ConsumerClosed {
            consumer_id: consumed["consumerId"].as_str().unwrap().to_string(),
            producer_id: screen,
        }
    );

    let state = coordinator.room_state("R1").await.unwrap();
    assert_eq!(state.screen_share_holder, None);
    assert_eq!(state.producer_count, 1, "camera {camera} stays live");

    // Someone else can share now.
    let bob_send = bob.create_transport("send").await;
    bob.produce(&bob_send, "video", true).await.unwrap();
}

#[tokio::test]
async fn test_stop_by_non_holder_changes_nothing() {
    let coordinator = TestCoordinator::new();
    let (mut alice, mut bob) = joined_pair(&coordinator).await;

    let send = alice.create_transport("send").await;
    alice.produce(&send, "video", true).await.unwrap();

    let ack = bob.request("stop-screen-share", json!({})).await.unwrap();
    assert_eq!(ack, json!({"stopped": false}));

    let state = coordinator.room_state("R1").await.unwrap();
    assert_eq!(state.screen_share_holder, Some(alice.peer_id));
}

#[tokio::test]
async fn test_holder_leaving_frees_the_token() {
    let coordinator = TestCoordinator::new();
    let (mut alice, mut bob) = joined_pair(&coordinator).await;
    let alice_id = alice.peer_id;

    let send = alice.create_transport("send").await;
    alice.produce(&send, "video", true).await.unwrap();
    alice.close().await;

    bob.wait_for(|e| matches!(e, ServerEvent::ScreenShareStopped { peer_id } if *peer_id == alice_id))
        .await;
    bob.wait_for(|e| matches!(e, ServerEvent::PeerLeft { peer_id } if *peer_id == alice_id))
        .await;

    let bob_send = bob.create_transport("send").await;
    bob.produce(&bob_send, "video", true).await.unwrap();

    let state = coordinator.room_state("R1").await.unwrap();
    assert_eq!(state.screen_share_holder, Some(bob.peer_id));
}

#[tokio::test]
async fn test_failed_screen_produce_releases_the_token() {
    let coordinator = TestCoordinator::new();
    let (mut alice, mut bob) = joined_pair(&coordinator).await;
    let alice_send = alice.create_transport("send").await;
    let bob_send = bob.create_transport("send").await;

    coordinator
        .engine
        .faults()
        .fail_produce
        .store(true, Ordering::SeqCst);
    let err = alice.produce(&alice_send, "video", true).await.unwrap_err();
    assert_eq!(err.code, 6);

    coordinator
        .engine
        .faults()
        .fail_produce
        .store(false, Ordering::SeqCst);
    bob.produce(&bob_send, "video", true).await.unwrap();

    let state = coordinator.room_state("R1").await.unwrap();
    assert_eq!(state.screen_share_holder, Some(bob.peer_id));
    assert!(
        !alice
            .drain_events()
            .contains(&ServerEvent::ScreenShareStarted {
                peer_id: alice.peer_id
            }),
        "a failed produce is never announced"
    );
}
