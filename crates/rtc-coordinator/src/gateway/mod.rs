//! Connection gateway: WebSocket transport for the session protocol.

pub mod ws;

pub use ws::ws_handler;
