//! Per-user correlation and state.
//!
//! One row per known user, keyed by a generated id with the internal user
//! id as alias. Besides the id pair, each row keeps the user attribute
//! blob from the last join event; the processor patches flags into it
//! (presenter, screen share, emoji, raise-hand) so later events can be
//! attributed without consulting the meeting server.

use crate::errors::WhError;
use crate::storage::{Compartment, KeyValueStore, StoredItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMappingPayload {
    #[serde(rename = "internalUserID")]
    pub internal_user_id: String,

    #[serde(rename = "externalUserID")]
    pub external_user_id: String,

    /// Internal id of the meeting the user is in.
    #[serde(rename = "meetingId")]
    pub meeting_id: String,

    /// User attribute blob from the join event, with flags patched in as
    /// later events arrive.
    pub user: Value,
}

pub type UserMapping = StoredItem<UserMappingPayload>;

/// Truthy check for a user-blob flag; stored values may be JSON booleans
/// or the string "true".
fn flag(user: &Value, key: &str) -> bool {
    match user.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

pub struct UserMappingRepository {
    compartment: Compartment<UserMappingPayload>,
}

impl UserMappingRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: &str) -> Self {
        Self {
            compartment: Compartment::new(
                store,
                format!("{namespace}:userMap"),
                format!("{namespace}:userMaps"),
                |payload| Some(payload.internal_user_id.clone()),
            ),
        }
    }

    /// Record or refresh a user row. Re-registering an existing internal
    /// user id updates the row in place.
    pub async fn add_or_update(
        &self,
        internal_user_id: &str,
        external_user_id: &str,
        meeting_id: &str,
        user: Value,
    ) -> Result<UserMapping, WhError> {
        let id = match self.compartment.find(internal_user_id) {
            Some(existing) => existing.id,
            None => Uuid::new_v4().to_string(),
        };
        let payload = UserMappingPayload {
            internal_user_id: internal_user_id.to_string(),
            external_user_id: external_user_id.to_string(),
            meeting_id: meeting_id.to_string(),
            user,
        };

        let mapping = self.compartment.save(&id, payload).await?;
        info!(
            target: "wh.registry.user_mappings",
            internal_user_id = %internal_user_id,
            meeting_id = %meeting_id,
            "Added or updated user mapping"
        );
        Ok(mapping)
    }

    /// Drop the rows for `internal_user_id`.
    pub async fn remove(&self, internal_user_id: &str) -> Result<Vec<UserMapping>, WhError> {
        self.compartment
            .destroy_where(|mapping| mapping.payload.internal_user_id == internal_user_id)
            .await
    }

    /// Drop every row belonging to a meeting.
    pub async fn remove_for_meeting(&self, meeting_id: &str) -> Result<Vec<UserMapping>, WhError> {
        self.compartment
            .destroy_where(|mapping| mapping.payload.meeting_id == meeting_id)
            .await
    }

    /// The stored user attribute blob, if the user is known.
    pub fn get_user(&self, internal_user_id: &str) -> Option<Value> {
        self.compartment
            .find(internal_user_id)
            .map(|mapping| mapping.payload.user)
    }

    pub fn external_user_id(&self, internal_user_id: &str) -> Option<String> {
        self.compartment
            .find(internal_user_id)
            .map(|mapping| mapping.payload.external_user_id)
    }

    /// Every user row for a meeting.
    pub fn users_for_meeting(&self, meeting_id: &str) -> Vec<UserMapping> {
        self.compartment
            .filter_where(|mapping| mapping.payload.meeting_id == meeting_id)
    }

    /// The user currently holding the presenter flag in a meeting.
    pub fn meeting_presenter(&self, meeting_id: &str) -> Option<UserMapping> {
        self.compartment.find_where(|mapping| {
            mapping.payload.meeting_id == meeting_id && flag(&mapping.payload.user, "presenter")
        })
    }

    /// The user currently holding the screen-share flag in a meeting.
    pub fn meeting_screen_share_owner(&self, meeting_id: &str) -> Option<UserMapping> {
        self.compartment.find_where(|mapping| {
            mapping.payload.meeting_id == meeting_id && flag(&mapping.payload.user, "screenshare")
        })
    }

    pub fn is_guest(&self, internal_user_id: &str) -> bool {
        self.compartment
            .find(internal_user_id)
            .is_some_and(|mapping| flag(&mapping.payload.user, "guest"))
    }

    /// Patch fields into the stored user blob. Returns false when the user
    /// is unknown or its stored blob is not an object.
    pub async fn patch_user_fields(
        &self,
        internal_user_id: &str,
        fields: &[(&str, Value)],
    ) -> Result<bool, WhError> {
        let Some(mut mapping) = self.compartment.find(internal_user_id) else {
            return Ok(false);
        };
        let Some(user) = mapping.payload.user.as_object_mut() else {
            return Ok(false);
        };
        for (key, value) in fields {
            user.insert((*key).to_string(), value.clone());
        }
        self.compartment.save(&mapping.id, mapping.payload).await?;
        Ok(true)
    }

    pub fn count(&self) -> usize {
        self.compartment.count()
    }

    /// Rebuild the in-memory index from the store.
    pub async fn resync(&self) -> Result<usize, WhError> {
        self.compartment.resync().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repository() -> UserMappingRepository {
        UserMappingRepository::new(Arc::new(crate::storage::MemoryStore::new()), "test")
    }

    fn user_blob(name: &str) -> Value {
        json!({
            "internal-user-id": format!("int-{name}"),
            "external-user-id": format!("ext-{name}"),
            "name": name,
            "role": "VIEWER",
            "presenter": false,
            "guest": false,
        })
    }

    async fn join(repo: &UserMappingRepository, name: &str, meeting: &str) {
        repo.add_or_update(
            &format!("int-{name}"),
            &format!("ext-{name}"),
            meeting,
            user_blob(name),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_lookups_by_internal_user_id() {
        let repo = repository();
        join(&repo, "ann", "meeting-1").await;

        assert_eq!(
            repo.external_user_id("int-ann"),
            Some("ext-ann".to_string())
        );
        let user = repo.get_user("int-ann").unwrap();
        assert_eq!(user["name"], "ann");
        assert!(repo.get_user("int-bob").is_none());
    }

    #[tokio::test]
    async fn test_users_for_meeting_and_removal() {
        let repo = repository();
        join(&repo, "ann", "meeting-1").await;
        join(&repo, "bob", "meeting-1").await;
        join(&repo, "eve", "meeting-2").await;

        assert_eq!(repo.users_for_meeting("meeting-1").len(), 2);

        let removed = repo.remove_for_meeting("meeting-1").await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(repo.count(), 1);
        assert!(repo.get_user("int-ann").is_none());
        assert!(repo.get_user("int-eve").is_some());
    }

    #[tokio::test]
    async fn test_presenter_and_screen_share_queries() {
        let repo = repository();
        join(&repo, "ann", "meeting-1").await;
        join(&repo, "bob", "meeting-1").await;

        assert!(repo.meeting_presenter("meeting-1").is_none());

        repo.patch_user_fields("int-ann", &[("presenter", json!(true))])
            .await
            .unwrap();
        let presenter = repo.meeting_presenter("meeting-1").unwrap();
        assert_eq!(presenter.payload.internal_user_id, "int-ann");

        repo.patch_user_fields("int-bob", &[("screenshare", json!(true))])
            .await
            .unwrap();
        let owner = repo.meeting_screen_share_owner("meeting-1").unwrap();
        assert_eq!(owner.payload.internal_user_id, "int-bob");
    }

    #[tokio::test]
    async fn test_is_guest_accepts_bool_and_string() {
        let repo = repository();
        join(&repo, "ann", "meeting-1").await;
        assert!(!repo.is_guest("int-ann"));

        repo.patch_user_fields("int-ann", &[("guest", json!(true))])
            .await
            .unwrap();
        assert!(repo.is_guest("int-ann"));

        repo.patch_user_fields("int-ann", &[("guest", json!("true"))])
            .await
            .unwrap();
        assert!(repo.is_guest("int-ann"));
    }

    #[tokio::test]
    async fn test_patch_unknown_user_is_noop() {
        let repo = repository();
        assert!(!repo
            .patch_user_fields("int-ghost", &[("presenter", json!(true))])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_resync_restores_user_blob() {
        let store: Arc<dyn crate::storage::KeyValueStore> =
            Arc::new(crate::storage::MemoryStore::new());
        let writer = UserMappingRepository::new(Arc::clone(&store), "test");
        writer
            .add_or_update("int-ann", "ext-ann", "meeting-1", user_blob("ann"))
            .await
            .unwrap();

        let reader = UserMappingRepository::new(store, "test");
        assert_eq!(reader.resync().await.unwrap(), 1);
        let user = reader.get_user("int-ann").unwrap();
        assert_eq!(user["role"], "VIEWER");
        assert_eq!(user["presenter"], json!(false));
    }
}
