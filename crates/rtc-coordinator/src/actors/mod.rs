//! Actor model for the coordinator.
//!
//! ```text
//! RoomRegistryActor (singleton)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room)
//!         ├── owns Peer Sessions and their media resources
//!         └── owns the screen-share token
//!
//! ConnectionActor (one per client connection)
//! └── forwards requests to its room and to the chat service
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer per room**: every membership, media and screen-share
//!   mutation for a room runs inside its `RoomActor`, one message at a time
//! - **CancellationToken propagation**: the registry's token is the parent of
//!   every room and connection token
//! - **Mailbox monitoring**: depth thresholds with metrics (Room: 100/500, Connection: 50/200)
//! - **Non-blocking fan-out**: broadcasts go through per-connection bounded queues
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor`, get-or-create and retirement of rooms
//! - [`room`] - `RoomActor` per live room
//! - [`connection`] - `ConnectionActor` per client connection
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics
//! - [`peer`] - Peer Session resource maps
//! - [`screen_share`] - Exclusive screen-share token

mod broker;
mod cleanup;
pub mod connection;
pub mod messages;
pub mod metrics;
pub mod peer;
pub mod registry;
pub mod room;
pub mod screen_share;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::{RegistryStatus, RoomState};
pub use metrics::{ActorMetrics, MailboxMonitor};
pub use registry::{RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle, RoomSettings};
