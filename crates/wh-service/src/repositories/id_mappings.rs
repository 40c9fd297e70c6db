//! Internal/external meeting id correlation.
//!
//! Raw events carry only the internal meeting id; receivers are addressed
//! by the external one. Rows are keyed by a generated id with the internal
//! meeting id as alias, so the normalizer's lookup by internal id is a map
//! hit. Each processed event refreshes the row's `lastActivity`; rows idle
//! past the configured timeout are expired by the cleanup task.

use crate::errors::WhError;
use crate::repositories::now_millis;
use crate::storage::{Compartment, KeyValueStore, StoredItem};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdMappingPayload {
    #[serde(rename = "internalMeetingID")]
    pub internal_meeting_id: String,

    #[serde(rename = "externalMeetingID")]
    pub external_meeting_id: String,

    /// Millisecond timestamp of the last event seen for this meeting.
    #[serde(rename = "lastActivity")]
    pub last_activity: i64,
}

pub type IdMapping = StoredItem<IdMappingPayload>;

pub struct IdMappingRepository {
    compartment: Compartment<IdMappingPayload>,
}

impl IdMappingRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: &str) -> Self {
        Self {
            compartment: Compartment::new(
                store,
                format!("{namespace}:mapping"),
                format!("{namespace}:mappings"),
                |payload| Some(payload.internal_meeting_id.clone()),
            ),
        }
    }

    /// Record the internal/external pair for a meeting, refreshing
    /// `lastActivity`. Re-registering an existing internal id updates the
    /// row in place.
    pub async fn add_or_update(
        &self,
        internal_meeting_id: &str,
        external_meeting_id: &str,
    ) -> Result<IdMapping, WhError> {
        let id = match self.compartment.find(internal_meeting_id) {
            Some(existing) => existing.id,
            None => Uuid::new_v4().to_string(),
        };
        let payload = IdMappingPayload {
            internal_meeting_id: internal_meeting_id.to_string(),
            external_meeting_id: external_meeting_id.to_string(),
            last_activity: now_millis(),
        };

        let mapping = self.compartment.save(&id, payload).await?;
        info!(
            target: "wh.registry.id_mappings",
            internal_meeting_id = %internal_meeting_id,
            external_meeting_id = %external_meeting_id,
            "Added or updated meeting mapping"
        );
        Ok(mapping)
    }

    /// Drop the mapping rows for `internal_meeting_id`.
    pub async fn remove(&self, internal_meeting_id: &str) -> Result<Vec<IdMapping>, WhError> {
        self.compartment
            .destroy_where(|mapping| mapping.payload.internal_meeting_id == internal_meeting_id)
            .await
    }

    /// External id for a known internal meeting id.
    pub fn external_meeting_id(&self, internal_meeting_id: &str) -> Option<String> {
        self.compartment
            .find(internal_meeting_id)
            .map(|mapping| mapping.payload.external_meeting_id)
    }

    /// Internal id for a known external meeting id.
    pub fn internal_meeting_id(&self, external_meeting_id: &str) -> Option<String> {
        self.compartment
            .find_where(|mapping| mapping.payload.external_meeting_id == external_meeting_id)
            .map(|mapping| mapping.payload.internal_meeting_id)
    }

    /// Refresh `lastActivity` for a meeting. Returns false when the meeting
    /// is unknown.
    pub async fn report_activity(&self, internal_meeting_id: &str) -> Result<bool, WhError> {
        let Some(mut mapping) = self.compartment.find(internal_meeting_id) else {
            return Ok(false);
        };
        mapping.payload.last_activity = now_millis();
        self.compartment.save(&mapping.id, mapping.payload).await?;
        Ok(true)
    }

    /// Mappings whose last activity is older than `timeout`.
    pub fn expired(&self, timeout: Duration) -> Vec<IdMapping> {
        let cutoff = now_millis().saturating_sub(timeout.as_millis().try_into().unwrap_or(i64::MAX));
        self.compartment
            .filter_where(|mapping| mapping.payload.last_activity < cutoff)
    }

    pub fn all(&self) -> Vec<IdMapping> {
        self.compartment.all()
    }

    /// Rebuild the in-memory index from the store.
    pub async fn resync(&self) -> Result<usize, WhError> {
        self.compartment.resync().await
    }
}
