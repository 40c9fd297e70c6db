//! Key/value store abstraction.

use crate::errors::WhError;
use async_trait::async_trait;
use std::collections::HashMap;

/// The storage operations the service relies on.
///
/// Each persisted item is a string hash at `<prefix>:<id>`, and each
/// collection tracks membership in a set. Implementations must be safe to
/// call concurrently from multiple tasks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set all `fields` on the hash at `key`, creating it if absent.
    async fn hash_set_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), WhError>;

    /// Read every field of the hash at `key`. Missing keys yield an empty
    /// map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, WhError>;

    /// Add `member` to the set at `key`.
    async fn set_add(&self, key: &str, member: &str) -> Result<(), WhError>;

    /// Remove `member` from the set at `key`.
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), WhError>;

    /// List the members of the set at `key`. Missing keys yield an empty
    /// list.
    async fn set_members(&self, key: &str) -> Result<Vec<String>, WhError>;

    /// Delete the value at `key`, if any.
    async fn delete(&self, key: &str) -> Result<(), WhError>;
}
