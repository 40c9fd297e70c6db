//! Write-through item compartments.
//!
//! A [`Compartment`] owns one collection of persisted items: a string hash
//! per item at `<prefix>:<id>` plus a membership set listing the ids. Every
//! mutation writes the backing store first and only then updates an
//! in-memory index, so reads (by id, by alias, or by predicate) are served
//! from memory without touching the backend and the store never lags behind
//! the index.
//!
//! Payloads are flattened into string hashes: string fields are stored
//! verbatim, nulls are skipped, and everything else is stored as its JSON
//! rendering. Restoring reverses that per field, keeping values that do not
//! parse as JSON as bare strings.

use crate::errors::WhError;
use crate::storage::kv::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// An item held by a [`Compartment`]: its id plus the typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem<T> {
    pub id: String,
    pub payload: T,
}

/// Extracts the optional secondary lookup key from a payload.
type AliasFn<T> = fn(&T) -> Option<String>;

struct Index<T> {
    by_id: HashMap<String, StoredItem<T>>,
    /// alias -> id
    by_alias: HashMap<String, String>,
}

impl<T> Default for Index<T> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            by_alias: HashMap::new(),
        }
    }
}

/// One persisted collection with an in-memory index over id and alias.
pub struct Compartment<T> {
    store: Arc<dyn KeyValueStore>,
    /// Item hashes live at `<item_prefix>:<id>`.
    item_prefix: String,
    /// Set listing the ids of every item in the collection.
    set_key: String,
    alias_of: AliasFn<T>,
    index: RwLock<Index<T>>,
}

impl<T> Compartment<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        item_prefix: String,
        set_key: String,
        alias_of: AliasFn<T>,
    ) -> Self {
        Self {
            store,
            item_prefix,
            set_key,
            alias_of,
            index: RwLock::new(Index::default()),
        }
    }

    fn item_key(&self, id: &str) -> String {
        format!("{}:{id}", self.item_prefix)
    }

    /// A poisoned lock still holds coherent data; keep serving it.
    fn read_index(&self) -> RwLockReadGuard<'_, Index<T>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, Index<T>> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist `payload` under `id`, then update the index.
    ///
    /// Saving an existing id overwrites it; if the alias changed, the stale
    /// alias entry is dropped.
    pub async fn save(&self, id: &str, payload: T) -> Result<StoredItem<T>, WhError> {
        let fields = flatten(id, &payload)?;
        self.store.hash_set_all(&self.item_key(id), &fields).await?;
        self.store.set_add(&self.set_key, id).await?;

        let item = StoredItem {
            id: id.to_string(),
            payload,
        };
        self.index_insert(item.clone());
        Ok(item)
    }

    /// Remove the item with `id`, returning it if it existed.
    pub async fn destroy(&self, id: &str) -> Result<Option<StoredItem<T>>, WhError> {
        self.store.delete(&self.item_key(id)).await?;
        self.store.set_remove(&self.set_key, id).await?;

        let mut index = self.write_index();
        let removed = index.by_id.remove(id);
        if let Some(item) = &removed {
            if let Some(alias) = (self.alias_of)(&item.payload) {
                index.by_alias.remove(&alias);
            }
        }
        Ok(removed)
    }

    /// Look up an item by id, falling back to alias.
    pub fn find(&self, id_or_alias: &str) -> Option<StoredItem<T>> {
        let index = self.read_index();
        if let Some(item) = index.by_id.get(id_or_alias) {
            return Some(item.clone());
        }
        index
            .by_alias
            .get(id_or_alias)
            .and_then(|id| index.by_id.get(id))
            .cloned()
    }

    /// First item matching `predicate`, if any.
    pub fn find_where(&self, predicate: impl Fn(&StoredItem<T>) -> bool) -> Option<StoredItem<T>> {
        self.read_index()
            .by_id
            .values()
            .find(|item| predicate(item))
            .cloned()
    }

    /// Every item matching `predicate`.
    pub fn filter_where(&self, predicate: impl Fn(&StoredItem<T>) -> bool) -> Vec<StoredItem<T>> {
        self.read_index()
            .by_id
            .values()
            .filter(|item| predicate(item))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<StoredItem<T>> {
        self.read_index().by_id.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.read_index().by_id.len()
    }

    /// Destroy every item matching `predicate`, returning the removed items.
    pub async fn destroy_where(
        &self,
        predicate: impl Fn(&StoredItem<T>) -> bool,
    ) -> Result<Vec<StoredItem<T>>, WhError> {
        let matches = self.filter_where(predicate);
        let mut removed = Vec::with_capacity(matches.len());
        for item in matches {
            if let Some(item) = self.destroy(&item.id).await? {
                removed.push(item);
            }
        }
        Ok(removed)
    }

    /// Rebuild the in-memory index from the backing store.
    ///
    /// Malformed rows are skipped with a warning rather than failing the
    /// whole load. Returns the number of items restored.
    pub async fn resync(&self) -> Result<usize, WhError> {
        let ids = self.store.set_members(&self.set_key).await?;
        let mut fresh = Index::default();

        for id in ids {
            let map = self.store.hash_get_all(&self.item_key(&id)).await?;
            if map.is_empty() {
                warn!(
                    target: "wh.storage.compartment",
                    id = %id,
                    set = %self.set_key,
                    "Set member has no stored hash, skipping"
                );
                continue;
            }
            // Trust the hash's own id field over the set member when present.
            let item_id = map.get("id").cloned().unwrap_or_else(|| id.clone());
            match restore::<T>(map) {
                Ok(payload) => {
                    if let Some(alias) = (self.alias_of)(&payload) {
                        fresh.by_alias.insert(alias, item_id.clone());
                    }
                    fresh.by_id.insert(
                        item_id.clone(),
                        StoredItem {
                            id: item_id,
                            payload,
                        },
                    );
                }
                Err(e) => {
                    warn!(
                        target: "wh.storage.compartment",
                        id = %item_id,
                        set = %self.set_key,
                        error = %e,
                        "Skipping malformed stored item"
                    );
                }
            }
        }

        let count = fresh.by_id.len();
        *self.write_index() = fresh;
        debug!(
            target: "wh.storage.compartment",
            set = %self.set_key,
            count = count,
            "Resynchronized compartment"
        );
        Ok(count)
    }

    fn index_insert(&self, item: StoredItem<T>) {
        let alias = (self.alias_of)(&item.payload);
        let mut index = self.write_index();
        if let Some(previous) = index.by_id.get(&item.id) {
            if let Some(old_alias) = (self.alias_of)(&previous.payload) {
                if alias.as_ref() != Some(&old_alias) {
                    index.by_alias.remove(&old_alias);
                }
            }
        }
        if let Some(alias) = alias {
            index.by_alias.insert(alias, item.id.clone());
        }
        index.by_id.insert(item.id.clone(), item);
    }
}

/// Flatten a payload into hash fields.
///
/// Strings are stored verbatim, nulls are skipped, and any other value is
/// stored as its JSON rendering. The item id is stored alongside the payload
/// fields.
fn flatten<T: Serialize>(id: &str, payload: &T) -> Result<Vec<(String, String)>, WhError> {
    let value = serde_json::to_value(payload)
        .map_err(|e| WhError::Serialization(format!("Failed to flatten payload: {e}")))?;
    let Value::Object(map) = value else {
        return Err(WhError::Serialization(
            "Payload must serialize to an object".to_string(),
        ));
    };

    let mut fields = vec![("id".to_string(), id.to_string())];
    for (key, value) in map {
        match value {
            Value::Null => {}
            Value::String(s) => fields.push((key, s)),
            other => {
                let rendered = serde_json::to_string(&other).map_err(|e| {
                    WhError::Serialization(format!("Failed to flatten field {key}: {e}"))
                })?;
                fields.push((key, rendered));
            }
        }
    }
    Ok(fields)
}

/// Restore a payload from hash fields, reversing [`flatten`].
fn restore<T: DeserializeOwned>(map: HashMap<String, String>) -> Result<T, WhError> {
    let mut object = serde_json::Map::new();
    for (key, raw) in map {
        let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
        object.insert(key, value);
    }
    serde_json::from_value(Value::Object(object))
        .map_err(|e| WhError::Serialization(format!("Failed to restore payload: {e}")))
}
