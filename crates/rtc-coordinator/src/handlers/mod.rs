//! HTTP request handlers.

pub mod chat;

pub use chat::{add_member, create_group, delete_notification, list_messages, list_notifications};
