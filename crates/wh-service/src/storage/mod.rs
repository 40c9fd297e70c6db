//! Persistence layer.
//!
//! All durable state (hooks and correlation mappings) lives behind the
//! [`KeyValueStore`] trait, which models the small slice of key/value
//! semantics the service needs: string hashes for item payloads plus a set
//! per collection for membership. [`RedisStore`] is the production backend;
//! [`MemoryStore`] backs tests and single-node development.
//!
//! [`Compartment`] layers a write-through, in-memory index on top of a
//! store so that the hot read paths (event normalization, hook selection)
//! never touch the backend.

pub mod compartment;
pub mod kv;
pub mod memory;
pub mod redis;

pub use compartment::{Compartment, StoredItem};
pub use kv::KeyValueStore;
pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::config::{Config, StorageBackend};
use crate::errors::WhError;
use common::secret::ExposeSecret;
use std::sync::Arc;

/// Connect the storage backend selected by configuration.
pub async fn connect(config: &Config) -> Result<Arc<dyn KeyValueStore>, WhError> {
    match config.storage_backend {
        StorageBackend::Redis => {
            let store = RedisStore::connect(config.redis_url.expose_secret()).await?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
