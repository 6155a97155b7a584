//! WebSocket gateway.
//!
//! One socket maps to one [`ConnectionActor`]. The socket loop only moves
//! frames: inbound text is validated and queued on the actor, outbound frames
//! are drained from the connection's [`EventSink`] queue and written out. The
//! drain keeps running while an inbound frame waits for mailbox space, since
//! the actor may itself be waiting for outbound space to write an ack.

use crate::actors::{ConnectionActor, ConnectionActorHandle};
use crate::errors::CoordinatorError;
use crate::observability::metrics;
use crate::protocol::{ClientFrame, ServerEvent, ServerFrame};
use crate::routes::AppState;
use crate::sink::EventSink;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use common::types::PeerId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Handler for GET /ws
///
/// Refuses new connections with 503 once the coordinator is draining.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if state.health.is_draining() {
        return CoordinatorError::Draining.into_response();
    }
    ws.on_upgrade(move |socket| serve_connection(socket, state))
}

#[instrument(skip_all, name = "rtc.gateway.connection", fields(peer_id))]
async fn serve_connection(mut socket: WebSocket, state: Arc<AppState>) {
    let peer_id = PeerId::new();
    tracing::Span::current().record("peer_id", tracing::field::display(peer_id));

    let (sink, mut outbound) = EventSink::channel(peer_id);
    let cancel_token = state.registry.child_token();
    let (connection, task) = ConnectionActor::spawn(
        peer_id,
        sink.clone(),
        state.registry.clone(),
        Arc::clone(&state.chat),
        cancel_token.clone(),
        Arc::clone(&state.metrics),
    );

    info!(target: "rtc.gateway", peer_id = %peer_id, "Connection accepted");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "rtc.gateway", peer_id = %peer_id, "Closing connection for shutdown");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if !write_frame(&mut socket, peer_id, &frame).await {
                    break;
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match ClientFrame::parse(&text) {
                            Ok(frame) => {
                                let queued =
                                    forward_request(&connection, frame, &mut outbound, &mut socket, peer_id)
                                        .await;
                                if !queued {
                                    break;
                                }
                            }
                            Err(rejected) => {
                                metrics::record_request(
                                    "invalid-frame",
                                    Some("invalid_payload"),
                                    Duration::ZERO,
                                );
                                reject(&sink, rejected.id, rejected.into_error());
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        reject(
                            &sink,
                            None,
                            CoordinatorError::InvalidPayload("binary frames are not supported".to_string()),
                        );
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(target: "rtc.gateway", peer_id = %peer_id, error = %e, "Socket error");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup runs in the actor; wait for it so the peer is gone before we log.
    if connection.closed().await.is_err() {
        connection.cancel();
    }
    if let Err(e) = task.await {
        warn!(target: "rtc.gateway", peer_id = %peer_id, error = ?e, "Connection actor failed");
    }

    info!(target: "rtc.gateway", peer_id = %peer_id, "Connection closed");
}

/// Write one outbound frame. Returns false once the socket is gone.
async fn write_frame(socket: &mut WebSocket, peer_id: PeerId, frame: &ServerFrame) -> bool {
    match frame.to_text() {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!(target: "rtc.gateway", peer_id = %peer_id, error = %e, "Dropping unencodable frame");
            true
        }
    }
}

/// Queue an inbound frame on the connection actor, writing outbound frames
/// until the mailbox has room.
async fn forward_request(
    connection: &ConnectionActorHandle,
    frame: ClientFrame,
    outbound: &mut mpsc::Receiver<ServerFrame>,
    socket: &mut WebSocket,
    peer_id: PeerId,
) -> bool {
    let request = connection.request(frame);
    tokio::pin!(request);

    loop {
        tokio::select! {
            queued = &mut request => return queued.is_ok(),
            Some(frame) = outbound.recv() => {
                if !write_frame(socket, peer_id, &frame).await {
                    return false;
                }
            }
        }
    }
}

/// Answer a frame that never reached the connection actor.
fn reject(sink: &EventSink, id: Option<u64>, error: CoordinatorError) {
    match id {
        Some(id) => {
            sink.deliver_frame(ServerFrame::ack(id, Err(error)));
        }
        None => {
            sink.deliver(ServerEvent::Error(error.to_payload()));
        }
    }
}
