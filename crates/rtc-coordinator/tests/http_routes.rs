//! Chat REST routes.
//!
//! Exercises the full router (state, layers, error mapping) with
//! `tower::ServiceExt::oneshot`, backed by the in-memory store.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use common::types::UserId;
use http_body_util::BodyExt;
use rtc_coordinator::chat::models::NotificationKind;
use rtc_coordinator::observability::HealthState;
use rtc_coordinator::protocol::SendNotificationRequest;
use rtc_coordinator::routes::{build_routes, AppState};
use rtc_test_utils::{MockChatStore, TestCoordinator};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(coordinator: &TestCoordinator) -> Router {
    let state = Arc::new(AppState {
        registry: coordinator.registry.clone(),
        chat: Arc::clone(&coordinator.chat),
        health: Arc::new(HealthState::new()),
        metrics: Arc::clone(&coordinator.metrics),
    });
    build_routes(state, "http://localhost:3000")
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_create_group_then_conflict() {
    let coordinator = TestCoordinator::new();
    let app = app(&coordinator);

    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/groups",
        Some(json!({"name": "movies", "createdBy": "alice", "kind": "watch_party"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["name"], "movies");
    assert_eq!(body["kind"], "watch_party");
    assert_eq!(body["createdBy"], "alice");
    assert!(body["id"].is_string());

    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/groups",
        Some(json!({"name": "movies", "createdBy": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], 5);
    assert_eq!(coordinator.store.group_count(), 1);
}

#[tokio::test]
async fn test_create_group_with_empty_name_is_bad_request() {
    let coordinator = TestCoordinator::new();
    let app = app(&coordinator);

    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/groups",
        Some(json!({"name": "  ", "createdBy": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], 1);
}

#[tokio::test]
async fn test_add_member_paths() {
    let coordinator = TestCoordinator::builder()
        .store(MockChatStore::builder().with_group("general").build())
        .build();
    let app = app(&coordinator);

    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/groups/general/members",
        Some(json!({"userId": "bob", "role": "admin"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["userId"], "bob");
    assert_eq!(body["role"], "admin");
    assert_eq!(body["status"], "joined");

    let (status, _) = call(
        &app,
        Method::POST,
        "/v1/groups/general/members",
        Some(json!({"userId": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &app,
        Method::POST,
        "/v1/groups/nowhere/members",
        Some(json!({"userId": "bob"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Group not found");
}

#[tokio::test]
async fn test_list_messages_for_unknown_group_is_not_found() {
    let coordinator = TestCoordinator::new();
    let app = app(&coordinator);

    let (status, body) = call(&app, Method::GET, "/v1/groups/nowhere/messages", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 4);
}

#[tokio::test]
async fn test_list_messages_returns_history() {
    let coordinator = TestCoordinator::builder()
        .store(MockChatStore::builder().with_group("general").build())
        .build();
    let mut alice = coordinator.connect();
    alice
        .request(
            "message",
            json!({"roomName": "general", "senderInfo": {"id": "alice"}, "text": "hi"}),
        )
        .await
        .unwrap();
    let app = app(&coordinator);

    let (status, body) = call(&app, Method::GET, "/v1/groups/general/messages", None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["text"], "hi");
    assert_eq!(messages[0]["senderId"], "alice");
}

#[tokio::test]
async fn test_notifications_list_and_delete() {
    let coordinator = TestCoordinator::new();
    coordinator
        .chat
        .send_notification(SendNotificationRequest {
            sender_id: UserId::new("alice"),
            receiver_id: UserId::new("bob"),
            message: "hello".to_string(),
            kind: NotificationKind::Message,
            link: None,
        })
        .await
        .unwrap();
    let app = app(&coordinator);

    let (status, body) = call(&app, Method::GET, "/v1/notifications/bob", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["type"], "message");
    assert_eq!(listed[0]["read"], false);
    let id = listed[0]["id"].clone();

    let (status, body) = call(&app, Method::DELETE, "/v1/notifications/bob", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);

    let (status, body) = call(&app, Method::DELETE, "/v1/notifications/bob", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], 4);
}

#[tokio::test]
async fn test_store_outage_is_internal_error_without_details() {
    let coordinator = TestCoordinator::builder()
        .store(MockChatStore::builder().failing().build())
        .build();
    let app = app(&coordinator);

    let (status, body) = call(&app, Method::GET, "/v1/notifications/bob", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], 6);
    assert_eq!(body["error"]["message"], "An internal error occurred");
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let coordinator = TestCoordinator::new();
    let app = app(&coordinator);

    let (status, _) = call(&app, Method::GET, "/v1/unknown", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
