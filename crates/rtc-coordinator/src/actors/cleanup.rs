//! Disconnect cleanup.
//!
//! Reclaims everything a peer owns when its connection ends. Running it again
//! for a peer that is already gone does nothing, so the connection actor can
//! call it on every exit path.

use super::room::RoomActor;
use crate::protocol::ServerEvent;
use common::types::PeerId;
use tracing::{debug, info, warn};

impl RoomActor {
    /// Remove `peer_id` from the room.
    ///
    /// 1. Release the screen-share token if the peer holds it.
    /// 2. Close every transport the peer owns. The router cascades closure to
    ///    producers and consumers; consumers of this peer's producers in other
    ///    peers are reported back as `consumer-closed`.
    /// 3. Drop the peer and tell the remaining members.
    /// 4. If the room is now empty, ask the registry to retire it.
    pub(super) async fn handle_disconnect(&mut self, peer_id: PeerId) {
        let Some(peer) = self.peers.get(&peer_id) else {
            debug!(
                target: "rtc.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "Disconnect for unknown peer, nothing to clean up"
            );
            return;
        };
        let transport_ids: Vec<String> = peer.transports.keys().cloned().collect();

        self.release_screen_share(peer_id);

        for transport_id in &transport_ids {
            if let Err(e) = self
                .media_call("close_transport", self.router.close_transport(transport_id))
                .await
            {
                // The router reclaims it when the room closes.
                warn!(
                    target: "rtc.actor.room",
                    room_id = %self.room_id,
                    peer_id = %peer_id,
                    transport_id = %transport_id,
                    error = %e,
                    "Failed to close transport during cleanup"
                );
            }
        }

        if self.peers.remove(&peer_id).is_some() {
            self.metrics.peer_left();
        }
        self.broadcast(None, &ServerEvent::PeerLeft { peer_id });

        info!(
            target: "rtc.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            closed_transports = transport_ids.len(),
            remaining_peers = self.peers.len(),
            "Peer left"
        );

        if self.peers.is_empty() {
            self.notify_idle();
        }
    }
}
