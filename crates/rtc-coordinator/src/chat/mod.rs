//! Chat groups, messages and notifications.
//!
//! [`ChatService`] persists through a [`ChatStore`] and fans out through the
//! [`SubscriptionHub`].

pub mod hub;
pub mod models;
pub mod redis_store;
pub mod service;
pub mod store;

pub use hub::SubscriptionHub;
pub use redis_store::RedisChatStore;
pub use service::ChatService;
pub use store::{ChatStore, StoreError};
