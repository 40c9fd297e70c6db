//! In-process storage backend.
//!
//! Keeps hashes and sets in plain maps behind a mutex. Nothing survives a
//! restart; integration tests and single-node development use this backend
//! so they can run without a Redis instance.

use crate::errors::WhError;
use crate::storage::kv::KeyValueStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
}

/// Memory-backed [`KeyValueStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A poisoned mutex still holds coherent data; keep serving it.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn hash_set_all(&self, key: &str, fields: &[(String, String)]) -> Result<(), WhError> {
        let mut inner = self.lock();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, WhError> {
        Ok(self.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), WhError> {
        self.lock()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), WhError> {
        if let Some(set) = self.lock().sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, WhError> {
        Ok(self
            .lock()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, key: &str) -> Result<(), WhError> {
        let mut inner = self.lock();
        inner.hashes.remove(key);
        inner.sets.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_round_trip() {
        let store = MemoryStore::new();
        store
            .hash_set_all(
                "ns:item:1",
                &[
                    ("id".to_string(), "1".to_string()),
                    ("name".to_string(), "Ann".to_string()),
                ],
            )
            .await
            .unwrap();

        let map = store.hash_get_all("ns:item:1").await.unwrap();
        assert_eq!(map.get("name"), Some(&"Ann".to_string()));

        store.delete("ns:item:1").await.unwrap();
        assert!(store.hash_get_all("ns:item:1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_membership() {
        let store = MemoryStore::new();
        store.set_add("ns:items", "1").await.unwrap();
        store.set_add("ns:items", "2").await.unwrap();
        store.set_add("ns:items", "2").await.unwrap();

        let mut members = store.set_members("ns:items").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["1".to_string(), "2".to_string()]);

        store.set_remove("ns:items", "1").await.unwrap();
        assert_eq!(store.set_members("ns:items").await.unwrap(), vec!["2"]);
    }

    #[tokio::test]
    async fn test_missing_keys_are_empty() {
        let store = MemoryStore::new();
        assert!(store.hash_get_all("nope").await.unwrap().is_empty());
        assert!(store.set_members("nope").await.unwrap().is_empty());
    }
}
