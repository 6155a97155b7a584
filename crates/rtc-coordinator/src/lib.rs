//! RTC Coordinator Library
//!
//! Coordinates multi-party audio/video rooms and room- or user-scoped text
//! messaging over persistent client connections:
//!
//! - Room lifecycle: rooms are created on first join and retired when empty
//! - Media resource brokering: transports, producers and consumers per peer,
//!   with ownership and direction rules
//! - Screen-share arbitration: one sharer per room
//! - Chat and notification fan-out: persisted first, then broadcast
//! - Disconnect cleanup that reclaims everything a peer owned
//!
//! # Architecture
//!
//! ```text
//! RoomRegistryActor (singleton)
//! └── supervises N RoomActors
//!     └── RoomActor (one per live room, single writer for its state)
//!
//! ConnectionActor (one per WebSocket connection)
//! ├── forwards media requests to its RoomActor
//! └── forwards chat requests to ChatService
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Registry, room and connection actors
//! - [`chat`] - Chat groups, messages, notifications and their store
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with wire error codes
//! - [`gateway`] - WebSocket transport
//! - [`handlers`] - HTTP chat endpoints
//! - [`media`] - Media engine capability and worker supervision
//! - [`observability`] - Health checks and metrics
//! - [`protocol`] - Versioned wire protocol
//! - [`routes`] - HTTP router and shared state
//! - [`sink`] - Per-connection outbound queue

pub mod actors;
pub mod chat;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod handlers;
pub mod media;
pub mod observability;
pub mod protocol;
pub mod routes;
pub mod sink;
