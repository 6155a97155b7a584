//! Redis-backed [`ChatStore`].
//!
//! # Key Patterns
//!
//! - `rtc:group-names` - HASH name -> group id (HSETNX enforces unique names)
//! - `rtc:group:{id}` - Group document (JSON)
//! - `rtc:group:{id}:members` - HASH user id -> member document (HSETNX enforces unique pairs)
//! - `rtc:group:{id}:messages` - ZSET of message ids scored by creation time (ms)
//! - `rtc:message:{id}` - Message document (JSON)
//! - `rtc:notification:{id}` - Notification document (JSON)
//! - `rtc:user:{id}:notifications` - ZSET of notification ids scored by creation time (ms)
//!
//! The `MultiplexedConnection` is cloned per call; it is designed for
//! concurrent use without locking.

use super::models::{ChatGroup, ChatMessage, GroupMember, Notification};
use super::store::{ChatStore, StoreError};
use async_trait::async_trait;
use common::types::UserId;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument, warn};

/// Delete a message document and unlink it from its group's history.
///
/// KEYS[1] = message key, ARGV[1] = message id. Returns 1 if deleted, 0 if absent.
const DELETE_MESSAGE: &str = r"
local doc = redis.call('GET', KEYS[1])
if not doc then
    return 0
end
local group_id = cjson.decode(doc)['groupId']
redis.call('DEL', KEYS[1])
redis.call('ZREM', 'rtc:group:' .. group_id .. ':messages', ARGV[1])
return 1
";

/// Set `read = true` on a notification document.
///
/// KEYS[1] = notification key. Returns 1 if updated, 0 if absent.
const MARK_READ: &str = r"
local doc = redis.call('GET', KEYS[1])
if not doc then
    return 0
end
local notification = cjson.decode(doc)
notification['read'] = true
redis.call('SET', KEYS[1], cjson.encode(notification))
return 1
";

/// Remove the oldest notification for a receiver.
///
/// KEYS[1] = receiver's notification index. Returns the removed id or nil.
const POP_OLDEST_NOTIFICATION: &str = r"
local ids = redis.call('ZRANGE', KEYS[1], 0, 0)
if #ids == 0 then
    return false
end
redis.call('ZREM', KEYS[1], ids[1])
redis.call('DEL', 'rtc:notification:' .. ids[1])
return ids[1]
";

const GROUP_NAMES_KEY: &str = "rtc:group-names";

fn group_key(id: &str) -> String {
    format!("rtc:group:{id}")
}

fn members_key(group_id: &str) -> String {
    format!("rtc:group:{group_id}:members")
}

fn history_key(group_id: &str) -> String {
    format!("rtc:group:{group_id}:messages")
}

fn message_key(id: &str) -> String {
    format!("rtc:message:{id}")
}

fn notification_key(id: &str) -> String {
    format!("rtc:notification:{id}")
}

fn inbox_key(receiver_id: &UserId) -> String {
    format!("rtc:user:{receiver_id}:notifications")
}

fn backend(operation: &str, e: &redis::RedisError) -> StoreError {
    warn!(
        target: "rtc.store.redis",
        operation = operation,
        error = %e,
        "Redis command failed"
    );
    StoreError::Backend(format!("{operation} failed: {e}"))
}

/// Chat store over a single Redis connection.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct RedisChatStore {
    connection: MultiplexedConnection,
    delete_message_script: Script,
    mark_read_script: Script,
    pop_notification_script: Script,
}

impl RedisChatStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the URL is invalid or the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            // The URL may carry credentials; never log it.
            error!(
                target: "rtc.store.redis",
                error = %e,
                "Failed to open Redis client"
            );
            StoreError::Backend(format!("failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "rtc.store.redis",
                    error = %e,
                    "Failed to connect to Redis"
                );
                StoreError::Backend(format!("failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            delete_message_script: Script::new(DELETE_MESSAGE),
            mark_read_script: Script::new(MARK_READ),
            pop_notification_script: Script::new(POP_OLDEST_NOTIFICATION),
        })
    }

    async fn get_document<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.connection.clone();
        let doc: Option<String> = conn.get(key).await.map_err(|e| backend("GET", &e))?;
        match doc {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Load the documents an index points at, in index order. Dangling ids are skipped.
    async fn load_indexed<T: DeserializeOwned>(
        &self,
        index_key: &str,
        document_key: fn(&str) -> String,
    ) -> Result<Vec<T>, StoreError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn
            .zrange(index_key, 0, -1)
            .await
            .map_err(|e| backend("ZRANGE", &e))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| document_key(id)).collect();
        let docs: Vec<Option<String>> = conn.mget(&keys).await.map_err(|e| backend("MGET", &e))?;

        docs.into_iter()
            .flatten()
            .map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl ChatStore for RedisChatStore {
    #[instrument(skip_all, fields(group = %group.name))]
    async fn create_group(&self, group: &ChatGroup) -> Result<(), StoreError> {
        let json = serde_json::to_string(group)?;
        let mut conn = self.connection.clone();

        let claimed: bool = conn
            .hset_nx(GROUP_NAMES_KEY, &group.name, &group.id)
            .await
            .map_err(|e| backend("HSETNX", &e))?;
        if !claimed {
            return Err(StoreError::Conflict("group name already exists".to_string()));
        }

        let (): () = conn
            .set(group_key(&group.id), json)
            .await
            .map_err(|e| backend("SET", &e))?;

        debug!(
            target: "rtc.store.redis",
            group_id = %group.id,
            "Stored group"
        );
        Ok(())
    }

    async fn find_group_by_name(&self, name: &str) -> Result<Option<ChatGroup>, StoreError> {
        let mut conn = self.connection.clone();
        let id: Option<String> = conn
            .hget(GROUP_NAMES_KEY, name)
            .await
            .map_err(|e| backend("HGET", &e))?;

        match id {
            Some(id) => self.get_document(&group_key(&id)).await,
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(group_id = %member.group_id, user_id = %member.user_id))]
    async fn add_member(&self, member: &GroupMember) -> Result<(), StoreError> {
        let json = serde_json::to_string(member)?;
        let mut conn = self.connection.clone();

        let added: bool = conn
            .hset_nx(members_key(&member.group_id), member.user_id.as_str(), json)
            .await
            .map_err(|e| backend("HSETNX", &e))?;
        if added {
            Ok(())
        } else {
            Err(StoreError::Conflict("user is already a member".to_string()))
        }
    }

    #[instrument(skip_all, fields(message_id = %message.id))]
    async fn save_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let json = serde_json::to_string(message)?;
        let mut conn = self.connection.clone();

        let (): () = redis::pipe()
            .atomic()
            .set(message_key(&message.id), json)
            .ignore()
            .zadd(
                history_key(&message.group_id),
                &message.id,
                message.created_at.timestamp_millis(),
            )
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("save_message", &e))?;
        Ok(())
    }

    async fn find_message(&self, id: &str) -> Result<Option<ChatMessage>, StoreError> {
        self.get_document(&message_key(id)).await
    }

    #[instrument(skip_all, fields(message_id = %id))]
    async fn delete_message(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let deleted: i64 = self
            .delete_message_script
            .key(message_key(id))
            .arg(id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend("delete_message", &e))?;
        Ok(deleted == 1)
    }

    async fn list_messages(&self, group_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        self.load_indexed(&history_key(group_id), message_key).await
    }

    #[instrument(skip_all, fields(notification_id = %notification.id))]
    async fn save_notification(&self, notification: &Notification) -> Result<(), StoreError> {
        let json = serde_json::to_string(notification)?;
        let mut conn = self.connection.clone();

        let (): () = redis::pipe()
            .atomic()
            .set(notification_key(&notification.id), json)
            .ignore()
            .zadd(
                inbox_key(&notification.receiver_id),
                &notification.id,
                notification.created_at.timestamp_millis(),
            )
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("save_notification", &e))?;
        Ok(())
    }

    async fn mark_notification_read(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let updated: i64 = self
            .mark_read_script
            .key(notification_key(id))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend("mark_read", &e))?;
        Ok(updated == 1)
    }

    async fn list_notifications(&self, receiver_id: &UserId) -> Result<Vec<Notification>, StoreError> {
        self.load_indexed(&inbox_key(receiver_id), notification_key)
            .await
    }

    async fn delete_notification_for_receiver(
        &self,
        receiver_id: &UserId,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        self.pop_notification_script
            .key(inbox_key(receiver_id))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| backend("delete_notification", &e))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| backend("PING", &e))?;
        Ok(())
    }
}
