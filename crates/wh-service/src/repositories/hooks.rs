//! The registry of callback hooks.
//!
//! Hooks can be global, receiving callbacks for events from all meetings on
//! the server, or scoped to a specific meeting: if an `externalMeetingID` is
//! set on the hook it only receives events for that meeting.
//!
//! Registration is idempotent on the callback URL. Permanent hooks come from
//! configuration, get a stable id derived from their URL, and cannot be
//! removed through the API.

use crate::errors::WhError;
use crate::observability::metrics;
use crate::storage::{Compartment, KeyValueStore, StoredItem};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Persisted hook attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookPayload {
    /// Receiver endpoint for callback POSTs.
    #[serde(rename = "callbackURL")]
    pub callback_url: String,

    /// External meeting id this hook is scoped to; `None` makes the hook
    /// global.
    #[serde(rename = "externalMeetingID")]
    pub external_meeting_id: Option<String>,

    /// Lowercased allow-list of event kinds; `None` accepts everything.
    #[serde(rename = "eventID")]
    pub event_ids: Option<Vec<String>>,

    /// Permanent hooks survive API removal and retry forever.
    pub permanent: bool,

    /// Whether this hook also receives unprocessed raw events.
    #[serde(rename = "getRaw")]
    pub get_raw: bool,
}

impl HookPayload {
    /// A hook with no external meeting id receives events from every
    /// meeting.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.external_meeting_id.is_none()
    }

    /// Whether `kind` passes this hook's event allow-list.
    #[must_use]
    pub fn accepts_event(&self, kind: &str) -> bool {
        match &self.event_ids {
            None => true,
            Some(ids) => {
                let kind = kind.to_lowercase();
                ids.iter().any(|id| *id == kind)
            }
        }
    }
}

pub type Hook = StoredItem<HookPayload>;

/// A hook registration request, as received by the administration API or
/// derived from configured permanent URLs.
#[derive(Debug, Clone)]
pub struct SubscriptionParams {
    pub callback_url: String,
    pub meeting_id: Option<String>,
    /// Raw comma-separated event filter; lowercased and split on storage.
    pub event_ids: Option<String>,
    pub permanent: bool,
    pub get_raw: bool,
}

/// Result of a registration attempt.
#[derive(Debug, Clone)]
pub struct SubscriptionOutcome {
    pub hook: Hook,
    /// True when the callback URL was already registered; `hook` is then the
    /// existing registration.
    pub duplicated: bool,
}

pub struct HookRepository {
    compartment: Compartment<HookPayload>,
}

impl HookRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: &str) -> Self {
        Self {
            compartment: Compartment::new(
                store,
                format!("{namespace}:hook"),
                format!("{namespace}:hooks"),
                |payload| Some(payload.callback_url.clone()),
            ),
        }
    }

    /// Register a hook, deduplicating on callback URL.
    ///
    /// Permanent hooks get a stable id derived from the URL so re-creation
    /// after a wipe yields the same id.
    pub async fn add_subscription(
        &self,
        params: SubscriptionParams,
    ) -> Result<SubscriptionOutcome, WhError> {
        if let Some(existing) = self.compartment.find(&params.callback_url) {
            return Ok(SubscriptionOutcome {
                hook: existing,
                duplicated: true,
            });
        }

        let payload = HookPayload {
            callback_url: params.callback_url.clone(),
            external_meeting_id: params.meeting_id.clone(),
            event_ids: params.event_ids.as_deref().map(split_event_filter),
            permanent: params.permanent,
            get_raw: params.get_raw,
        };

        info!(
            target: "wh.registry.hooks",
            callback_url = %params.callback_url,
            external_meeting_id = ?params.meeting_id,
            permanent = params.permanent,
            "Adding hook"
        );

        let id = if params.permanent {
            Uuid::new_v5(&Uuid::NAMESPACE_URL, params.callback_url.as_bytes())
        } else {
            Uuid::new_v4()
        };
        let hook = self.compartment.save(&id.to_string(), payload).await?;
        self.update_gauge();

        Ok(SubscriptionOutcome {
            hook,
            duplicated: false,
        })
    }

    /// Remove a hook by id. Returns false for unknown ids and for permanent
    /// hooks, which can only be dropped by changing configuration.
    pub async fn remove_subscription(&self, id: &str) -> Result<bool, WhError> {
        let Some(hook) = self.compartment.find(id) else {
            return Ok(false);
        };
        if hook.payload.permanent {
            return Ok(false);
        }

        info!(
            target: "wh.registry.hooks",
            hook_id = %hook.id,
            callback_url = %hook.payload.callback_url,
            external_meeting_id = ?hook.payload.external_meeting_id,
            "Removing hook"
        );
        let removed = self.compartment.destroy(id).await?.is_some();
        self.update_gauge();
        Ok(removed)
    }

    /// Register every configured permanent URL that is not yet present.
    pub async fn ensure_permanent(&self, urls: &[String], get_raw: bool) -> Result<usize, WhError> {
        let mut created = 0;
        for url in urls {
            let outcome = self
                .add_subscription(SubscriptionParams {
                    callback_url: url.clone(),
                    meeting_id: None,
                    event_ids: None,
                    permanent: true,
                    get_raw,
                })
                .await?;
            if !outcome.duplicated {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Look up a hook by id or callback URL.
    pub fn get_hook(&self, id: &str) -> Option<Hook> {
        self.compartment.find(id)
    }

    pub fn all(&self) -> Vec<Hook> {
        self.compartment.all()
    }

    /// Hooks that receive events from every meeting.
    pub fn all_global(&self) -> Vec<Hook> {
        self.compartment
            .filter_where(|hook| hook.payload.is_global())
    }

    /// Every hook scoped to `external_meeting_id`.
    pub fn find_by_external_meeting_id(&self, external_meeting_id: &str) -> Vec<Hook> {
        self.compartment.filter_where(|hook| {
            hook.payload.external_meeting_id.as_deref() == Some(external_meeting_id)
        })
    }

    pub fn count(&self) -> usize {
        self.compartment.count()
    }

    /// Rebuild the in-memory index from the store.
    pub async fn resync(&self) -> Result<usize, WhError> {
        let count = self.compartment.resync().await;
        self.update_gauge();
        count
    }

    fn update_gauge(&self) {
        metrics::set_registered_hooks(self.compartment.count());
    }
}

/// Lowercase and split a comma-separated event filter.
fn split_event_filter(raw: &str) -> Vec<String> {
    raw.to_lowercase()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
        .collect()
}
