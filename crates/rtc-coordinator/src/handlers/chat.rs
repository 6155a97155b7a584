//! Chat group and notification handlers.
//!
//! - `POST /v1/groups` - Create a group
//! - `POST /v1/groups/{name}/members` - Add a member to a group
//! - `GET /v1/groups/{name}/messages` - Group history, oldest first
//! - `GET /v1/notifications/{receiver_id}` - Notifications for a receiver
//! - `DELETE /v1/notifications/{receiver_id}` - Delete one notification for a receiver

use crate::chat::models::{ChatGroup, ChatMessage, GroupKind, GroupMember, MemberRole, Notification};
use crate::errors::CoordinatorError;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::types::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_by: UserId,
    #[serde(default)]
    pub kind: GroupKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub role: MemberRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub id: String,
}

/// Handler for POST /v1/groups
///
/// # Response
///
/// - 201 Created: group returned
/// - 400 Bad Request: empty name
/// - 409 Conflict: name already taken
#[instrument(skip_all, fields(group = %request.name))]
pub async fn create_group(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<ChatGroup>), CoordinatorError> {
    let group = state
        .chat
        .create_group(
            request.name,
            request.description,
            request.created_by,
            request.kind,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// Handler for POST /v1/groups/{name}/members
///
/// # Response
///
/// - 201 Created: membership returned
/// - 404 Not Found: unknown group
/// - 409 Conflict: user is already a member
#[instrument(skip_all, fields(group = %name))]
pub async fn add_member(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<GroupMember>), CoordinatorError> {
    let member = state
        .chat
        .add_member(&name, request.user_id, request.role)
        .await?;

    info!(
        target: "rtc.chat",
        group = %name,
        user_id = %member.user_id,
        "Member added"
    );
    Ok((StatusCode::CREATED, Json(member)))
}

/// Handler for GET /v1/groups/{name}/messages
#[instrument(skip_all, fields(group = %name))]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, CoordinatorError> {
    Ok(Json(state.chat.list_messages(&name).await?))
}

/// Handler for GET /v1/notifications/{receiver_id}
#[instrument(skip_all, fields(receiver_id = %receiver_id))]
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(receiver_id): Path<UserId>,
) -> Result<Json<Vec<Notification>>, CoordinatorError> {
    Ok(Json(state.chat.list_notifications(&receiver_id).await?))
}

/// Handler for DELETE /v1/notifications/{receiver_id}
///
/// # Response
///
/// - 200 OK: `{"id": "<deleted id>"}`
/// - 404 Not Found: the receiver has no notifications
#[instrument(skip_all, fields(receiver_id = %receiver_id))]
pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Path(receiver_id): Path<UserId>,
) -> Result<Json<DeletedResponse>, CoordinatorError> {
    let id = state.chat.delete_notification(&receiver_id).await?;
    Ok(Json(DeletedResponse { id }))
}
