//! Coordinator error types.
//!
//! Every request-style event acknowledges failures with a structured
//! `{code, message}` payload built from [`CoordinatorError::error_code`] and
//! [`CoordinatorError::client_message`]. Upstream details are logged
//! server-side but not exposed to clients.
//!
//! The same type backs the HTTP chat routes via its `IntoResponse` impl.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Client message for a screen-share request while another peer holds the token.
pub const SCREEN_SHARE_BUSY: &str = "another user is already sharing";

/// Coordinator error type.
///
/// Maps to wire error codes:
/// - Malformed or unknown event payload: `INVALID_PAYLOAD` (1)
/// - Any missing room/peer/transport/producer/consumer/message: `NOT_FOUND` (4)
/// - `Conflict`: `CONFLICT` (5)
/// - Media engine, store, timeout, internal: `UPSTREAM_FAILURE` (6)
/// - `Draining`: `UNAVAILABLE` (7)
/// - `CapabilityMismatch`: `CAPABILITY_MISMATCH` (8)
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Room not found.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Peer not found, or the peer has not joined a room yet.
    #[error("Peer not found")]
    PeerNotFound,

    /// Transport not owned by the requesting peer.
    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    /// Producer not present in the peer's room.
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// Consumer not owned by the requesting peer.
    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    /// Chat message not found.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Notification not found.
    #[error("Notification not found: {0}")]
    NotificationNotFound(String),

    /// Chat group not found.
    #[error("Group not found: {0}")]
    GroupNotFound(String),

    /// Conflict (screen share busy, duplicate group name, duplicate membership).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Offered capabilities cannot decode the requested media.
    #[error("Capability mismatch: {0}")]
    CapabilityMismatch(String),

    /// Media engine call failed.
    #[error("Media engine error: {0}")]
    MediaEngine(String),

    /// Document store call failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Upstream call exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Inbound payload failed schema validation.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Coordinator is draining (graceful shutdown).
    #[error("Coordinator is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Returns the wire error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            CoordinatorError::InvalidPayload(_) => 1, // INVALID_PAYLOAD
            CoordinatorError::RoomNotFound(_)
            | CoordinatorError::PeerNotFound
            | CoordinatorError::TransportNotFound(_)
            | CoordinatorError::ProducerNotFound(_)
            | CoordinatorError::ConsumerNotFound(_)
            | CoordinatorError::MessageNotFound(_)
            | CoordinatorError::NotificationNotFound(_)
            | CoordinatorError::GroupNotFound(_) => 4, // NOT_FOUND
            CoordinatorError::Conflict(_) => 5, // CONFLICT
            CoordinatorError::MediaEngine(_)
            | CoordinatorError::Store(_)
            | CoordinatorError::Timeout(_)
            | CoordinatorError::Internal(_) => 6, // UPSTREAM_FAILURE
            CoordinatorError::Draining => 7, // UNAVAILABLE
            CoordinatorError::CapabilityMismatch(_) => 8, // CAPABILITY_MISMATCH
        }
    }

    /// Returns a bounded label for the `error_type` metric dimension.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            CoordinatorError::RoomNotFound(_)
            | CoordinatorError::PeerNotFound
            | CoordinatorError::TransportNotFound(_)
            | CoordinatorError::ProducerNotFound(_)
            | CoordinatorError::ConsumerNotFound(_)
            | CoordinatorError::MessageNotFound(_)
            | CoordinatorError::NotificationNotFound(_)
            | CoordinatorError::GroupNotFound(_) => "not_found",
            CoordinatorError::Conflict(_) => "conflict",
            CoordinatorError::CapabilityMismatch(_) => "capability_mismatch",
            CoordinatorError::MediaEngine(_) => "media_engine",
            CoordinatorError::Store(_) => "store",
            CoordinatorError::Timeout(_) => "timeout",
            CoordinatorError::InvalidPayload(_) => "invalid_payload",
            CoordinatorError::Draining => "draining",
            CoordinatorError::Internal(_) => "internal",
        }
    }

    /// Returns a client-safe error message (no upstream details).
    pub fn client_message(&self) -> String {
        match self {
            CoordinatorError::MediaEngine(_)
            | CoordinatorError::Store(_)
            | CoordinatorError::Internal(_) => "An internal error occurred".to_string(),
            CoordinatorError::Timeout(_) => "Upstream request timed out".to_string(),
            CoordinatorError::RoomNotFound(_) => "Room not found".to_string(),
            CoordinatorError::PeerNotFound => "Peer not found".to_string(),
            CoordinatorError::TransportNotFound(_) => "Transport not found".to_string(),
            CoordinatorError::ProducerNotFound(_) => "Producer not found".to_string(),
            CoordinatorError::ConsumerNotFound(_) => "Consumer not found".to_string(),
            CoordinatorError::MessageNotFound(_) => "Message not found".to_string(),
            CoordinatorError::NotificationNotFound(_) => "Notification not found".to_string(),
            CoordinatorError::GroupNotFound(_) => "Group not found".to_string(),
            CoordinatorError::Draining => "Server is shutting down, please reconnect".to_string(),
            CoordinatorError::Conflict(msg)
            | CoordinatorError::CapabilityMismatch(msg)
            | CoordinatorError::InvalidPayload(msg) => msg.clone(),
        }
    }

    /// Structured payload carried in an error acknowledgement.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.error_code(),
            message: self.client_message(),
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self.error_code() {
            1 => StatusCode::BAD_REQUEST,
            4 => StatusCode::NOT_FOUND,
            5 => StatusCode::CONFLICT,
            7 => StatusCode::SERVICE_UNAVAILABLE,
            8 => StatusCode::UNPROCESSABLE_ENTITY,
            _ => match self {
                CoordinatorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

/// Wire representation of an error: `{"code": 4, "message": "Room not found"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
}

/// HTTP error body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorPayload,
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            // Log actual error server-side, return generic message to client
            tracing::error!(target: "rtc.gateway", error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_payload(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            CoordinatorError::InvalidPayload("missing field".to_string()).error_code(),
            1
        );

        assert_eq!(CoordinatorError::RoomNotFound("R1".to_string()).error_code(), 4);
        assert_eq!(CoordinatorError::PeerNotFound.error_code(), 4);
        assert_eq!(
            CoordinatorError::TransportNotFound("t".to_string()).error_code(),
            4
        );
        assert_eq!(
            CoordinatorError::MessageNotFound("m".to_string()).error_code(),
            4
        );

        assert_eq!(
            CoordinatorError::Conflict(SCREEN_SHARE_BUSY.to_string()).error_code(),
            5
        );

        assert_eq!(
            CoordinatorError::MediaEngine("worker gone".to_string()).error_code(),
            6
        );
        assert_eq!(CoordinatorError::Store("io".to_string()).error_code(), 6);
        assert_eq!(CoordinatorError::Timeout("produce".to_string()).error_code(), 6);

        assert_eq!(CoordinatorError::Draining.error_code(), 7);
        assert_eq!(
            CoordinatorError::CapabilityMismatch("video".to_string()).error_code(),
            8
        );
    }

    #[test]
    fn test_client_messages_hide_upstream_details() {
        let store_err = CoordinatorError::Store("connection refused at 10.0.0.7:6379".to_string());
        assert!(!store_err.client_message().contains("10.0.0.7"));
        assert_eq!(store_err.client_message(), "An internal error occurred");

        let media_err = CoordinatorError::MediaEngine("router 42 closed".to_string());
        assert_eq!(media_err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_screen_share_conflict_message_is_exact() {
        let err = CoordinatorError::Conflict(SCREEN_SHARE_BUSY.to_string());
        assert_eq!(err.client_message(), "another user is already sharing");
        assert_eq!(
            err.to_payload(),
            ErrorPayload {
                code: 5,
                message: "another user is already sharing".to_string()
            }
        );
    }

    #[test]
    fn test_error_type_labels_are_bounded() {
        assert_eq!(
            CoordinatorError::ProducerNotFound("p".to_string()).error_type_label(),
            "not_found"
        );
        assert_eq!(
            CoordinatorError::Timeout("x".to_string()).error_type_label(),
            "timeout"
        );
    }

    #[tokio::test]
    async fn test_into_response_not_found() {
        let response = CoordinatorError::GroupNotFound("general".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], 4);
        assert_eq!(body["error"]["message"], "Group not found");
    }

    #[tokio::test]
    async fn test_into_response_store_error_is_generic() {
        let response = CoordinatorError::Store("WRONGTYPE".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_body_json(response.into_body()).await;
        assert_eq!(body["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn test_into_response_conflict() {
        let response =
            CoordinatorError::Conflict("group name already taken".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
