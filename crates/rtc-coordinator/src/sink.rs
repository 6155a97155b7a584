//! Outbound delivery to a single connection.
//!
//! Rooms, the chat hub and connection actors never write to a socket. They push
//! frames into the connection's bounded outbound queue with `try_send`, so a slow
//! or dead client can never stall a room. Frames that do not fit are dropped and
//! counted.
//!
//! Acknowledgements are the exception: the connection actor waits for queue
//! space (up to [`ACK_DELIVERY_TIMEOUT`]) so a burst of broadcasts cannot cost a
//! client the answer to its own request. Only that client's actor waits.

use crate::observability::metrics;
use crate::protocol::{ServerEvent, ServerFrame};
use common::types::PeerId;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

/// Outbound queue size per connection.
pub const OUTBOUND_CHANNEL_BUFFER: usize = 256;

/// How long an acknowledgement waits for outbound queue space.
pub const ACK_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Sending half of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    peer_id: PeerId,
    sender: mpsc::Sender<ServerFrame>,
}

impl EventSink {
    /// Create a sink and the receiver the gateway drains.
    #[must_use]
    pub fn channel(peer_id: PeerId) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (sender, receiver) = mpsc::channel(OUTBOUND_CHANNEL_BUFFER);
        (Self { peer_id, sender }, receiver)
    }

    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Deliver a server event. Returns false if the frame was dropped.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        self.deliver_frame(ServerFrame::Event(event))
    }

    /// Deliver any frame. Returns false if the frame was dropped.
    pub fn deliver_frame(&self, frame: ServerFrame) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    target: "rtc.gateway",
                    peer_id = %self.peer_id,
                    "Outbound queue full, dropping frame"
                );
                metrics::record_broadcast_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Connection already gone; cleanup will follow.
                metrics::record_broadcast_dropped();
                false
            }
        }
    }

    /// Deliver an acknowledgement, waiting for queue space if the client is
    /// behind. Returns false if the client went away or never caught up.
    pub async fn deliver_ack(&self, frame: ServerFrame) -> bool {
        match tokio::time::timeout(ACK_DELIVERY_TIMEOUT, self.sender.send(frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                metrics::record_broadcast_dropped();
                false
            }
            Err(_) => {
                warn!(
                    target: "rtc.gateway",
                    peer_id = %self.peer_id,
                    "Outbound queue stayed full, dropping acknowledgement"
                );
                metrics::record_broadcast_dropped();
                false
            }
        }
    }

    /// Whether the receiving side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
