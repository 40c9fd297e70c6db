//! Redis storage backend.
//!
//! Built on a single `MultiplexedConnection`. redis-rs multiplexes requests
//! over it, so each operation just clones the handle instead of taking a
//! lock or a pool slot.

use crate::errors::WhError;
use crate::storage::kv::KeyValueStore;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tracing::{debug, error};

/// Redis-backed [`KeyValueStore`].
///
/// Cheaply cloneable - the underlying `MultiplexedConnection` is designed to
/// be shared across tasks.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `WhError::Storage` if the client cannot be opened or the
    /// connection cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self, WhError> {
        // The URL can embed credentials (redis://:password@host), so it
        // stays out of the logs
        let client = Client::open(redis_url).map_err(|e| {
            error!(
                target: "wh.storage.redis",
                error = %e,
                "Cannot open Redis client"
            );
            WhError::Storage(format!("Cannot open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "wh.storage.redis",
                    error = %e,
                    "Cannot reach Redis"
                );
                WhError::Storage(format!("Cannot reach Redis: {e}"))
            })?;

        debug!(target: "wh.storage.redis", "Connected to Redis");

        Ok(Self { connection })
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn hash_set_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), WhError> {
        if fields.is_empty() {
            return Ok(());
        }
        // One clone of the multiplexed handle per operation
        let mut conn = self.connection.clone();
        conn.hset_multiple::<_, _, _, ()>(key, fields)
            .await
            .map_err(|e| {
                error!(
                    target: "wh.storage.redis",
                    error = %e,
                    key = %key,
                    "Failed to write hash"
                );
                WhError::Storage(format!("Failed to write hash {key}: {e}"))
            })
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, WhError> {
        let mut conn = self.connection.clone();
        conn.hgetall(key).await.map_err(|e| {
            error!(
                target: "wh.storage.redis",
                error = %e,
                key = %key,
                "Failed to read hash"
            );
            WhError::Storage(format!("Failed to read hash {key}: {e}"))
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), WhError> {
        let mut conn = self.connection.clone();
        conn.sadd::<_, _, ()>(key, member).await.map_err(|e| {
            error!(
                target: "wh.storage.redis",
                error = %e,
                key = %key,
                "Failed to add set member"
            );
            WhError::Storage(format!("Failed to add member to {key}: {e}"))
        })
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), WhError> {
        let mut conn = self.connection.clone();
        conn.srem::<_, _, ()>(key, member).await.map_err(|e| {
            error!(
                target: "wh.storage.redis",
                error = %e,
                key = %key,
                "Failed to remove set member"
            );
            WhError::Storage(format!("Failed to remove member from {key}: {e}"))
        })
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, WhError> {
        let mut conn = self.connection.clone();
        conn.smembers(key).await.map_err(|e| {
            error!(
                target: "wh.storage.redis",
                error = %e,
                key = %key,
                "Failed to read set members"
            );
            WhError::Storage(format!("Failed to read members of {key}: {e}"))
        })
    }

    async fn delete(&self, key: &str) -> Result<(), WhError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key).await.map_err(|e| {
            error!(
                target: "wh.storage.redis",
                error = %e,
                key = %key,
                "Failed to delete key"
            );
            WhError::Storage(format!("Failed to delete {key}: {e}"))
        })
    }
}
