//! Event fan-out to registered hooks.
//!
//! For each event the dispatcher unions the global hooks with the hooks
//! scoped to the event's meeting, applies per-hook filters, and spawns one
//! [`CallbackEmitter`] per target. Emitters run detached; an exhausted
//! non-permanent hook is removed from the registry when its emitter stops.

use crate::delivery::{CallbackBody, CallbackEmitter, DeliverySettings, DeliveryOutcome};
use crate::errors::WhError;
use crate::events::CanonicalEvent;
use crate::observability::metrics;
use crate::processor::OutputConsumer;
use crate::repositories::{now_millis, Hook, HookRepository, IdMappingRepository};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw message locations that can carry the internal meeting id, probed in
/// order after the canonical attribute.
const RAW_MEETING_ID_POINTERS: [&str; 4] = [
    "/envelope/routing/meetingId",
    "/header/body/meetingId",
    "/core/body/props/meetingProp/intId",
    "/core/body/meetingId",
];

/// Output consumer that relays events to registered webhook URLs.
pub struct WebHooksDispatcher {
    hooks: Arc<HookRepository>,
    id_mappings: Arc<IdMappingRepository>,
    client: Client,
    settings: DeliverySettings,
    limiters: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
    cancel: CancellationToken,
}

impl WebHooksDispatcher {
    pub fn new(
        hooks: Arc<HookRepository>,
        id_mappings: Arc<IdMappingRepository>,
        settings: DeliverySettings,
        cancel: CancellationToken,
    ) -> Result<Self, WhError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| WhError::Delivery(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            hooks,
            id_mappings,
            client,
            settings,
            limiters: Arc::new(Mutex::new(HashMap::new())),
            cancel,
        })
    }

    /// Global hooks plus the hooks scoped to the event's meeting, when the
    /// meeting can be resolved to an external id.
    fn select_hooks(&self, event: &CanonicalEvent, raw: &Value) -> Vec<Hook> {
        let mut hooks = self.hooks.all_global();
        if let Some(internal) = extract_internal_meeting_id(event, raw) {
            let external = event
                .external_meeting_id()
                .map(ToString::to_string)
                .or_else(|| self.id_mappings.external_meeting_id(internal));
            if let Some(external) = external {
                hooks.extend(self.hooks.find_by_external_meeting_id(&external));
            }
        }
        hooks
    }

    fn limiter_for(&self, hook_id: &str) -> Option<Arc<Semaphore>> {
        let cap = self.settings.hook_max_in_flight?;
        let mut limiters = self
            .limiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Some(Arc::clone(
            limiters
                .entry(hook_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(cap))),
        ))
    }

    /// Deliver `message` to one hook on a detached task.
    fn spawn_emitter(&self, hook: &Hook, message: &str) {
        let body = CallbackBody {
            event: format!("[{message}]"),
            timestamp: now_millis(),
            domain: self.settings.domain.clone(),
        };
        let emitter = CallbackEmitter::new(
            self.client.clone(),
            hook.payload.callback_url.clone(),
            body,
            hook.payload.permanent,
            &self.settings,
        );

        let limiter = self.limiter_for(&hook.id);
        let limiters = Arc::clone(&self.limiters);
        let hooks = Arc::clone(&self.hooks);
        let hook_id = hook.id.clone();
        let callback_url = hook.payload.callback_url.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let _permit = match limiter {
                Some(semaphore) => {
                    tokio::select! {
                        permit = semaphore.acquire_owned() => {
                            match permit {
                                Ok(permit) => Some(permit),
                                Err(_) => return,
                            }
                        }
                        () = cancel.cancelled() => return,
                    }
                }
                None => None,
            };

            match emitter.run(cancel.clone()).await {
                DeliveryOutcome::Delivered { attempts } => {
                    info!(
                        target: "wh.delivery.dispatcher",
                        callback_url = %callback_url,
                        attempts,
                        "Callback delivered"
                    );
                    metrics::record_callback_outcome("delivered");
                }
                DeliveryOutcome::Stopped { attempts } => {
                    metrics::record_callback_outcome("stopped");
                    if cancel.is_cancelled() {
                        return;
                    }
                    warn!(
                        target: "wh.delivery.dispatcher",
                        callback_url = %callback_url,
                        attempts,
                        "Exhausted callback retries, removing hook"
                    );
                    match hooks.remove_subscription(&hook_id).await {
                        Ok(removed) => {
                            if removed {
                                limiters
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .remove(&hook_id);
                            }
                        }
                        Err(e) => {
                            error!(
                                target: "wh.delivery.dispatcher",
                                error = %e,
                                callback_url = %callback_url,
                                "Failed to remove exhausted hook"
                            );
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl OutputConsumer for WebHooksDispatcher {
    #[instrument(skip_all, fields(event_id = %event.id()))]
    async fn on_event(&self, event: &CanonicalEvent, raw: &Value) -> Result<(), WhError> {
        let hooks = self.select_hooks(event, raw);
        if hooks.is_empty() {
            debug!(target: "wh.delivery.dispatcher", "No hooks registered for this event");
            return Ok(());
        }

        let canonical_text = serde_json::to_string(event)
            .map_err(|e| WhError::Serialization(e.to_string()))?;
        let raw_text = serde_json::to_string(raw)
            .map_err(|e| WhError::Serialization(e.to_string()))?;
        // Raw messages only carry a kind if they were canonical already
        let raw_kind = raw.pointer("/data/id").and_then(Value::as_str);

        for hook in &hooks {
            let (message, kind) = if hook.payload.get_raw {
                if !self.settings.raw_delivery_enabled {
                    continue;
                }
                (&raw_text, raw_kind)
            } else {
                (&canonical_text, Some(event.id()))
            };

            if !allows(hook, kind) {
                debug!(
                    target: "wh.delivery.dispatcher",
                    callback_url = %hook.payload.callback_url,
                    event_id = %event.id(),
                    "Event not in hook's event list, skipping"
                );
                continue;
            }

            debug!(
                target: "wh.delivery.dispatcher",
                callback_url = %hook.payload.callback_url,
                raw = hook.payload.get_raw,
                "Dispatching event to hook"
            );
            self.spawn_emitter(hook, message);
        }

        Ok(())
    }
}

/// Hook-side event filter. Hooks without an allow-list accept everything;
/// a message with no kind only matches unfiltered hooks.
fn allows(hook: &Hook, kind: Option<&str>) -> bool {
    match kind {
        Some(kind) => hook.payload.accepts_event(kind),
        None => hook.payload.event_ids.is_none(),
    }
}

/// The internal meeting id, from the canonical attributes or from the raw
/// message locations used by the meeting server.
fn extract_internal_meeting_id<'a>(event: &'a CanonicalEvent, raw: &'a Value) -> Option<&'a str> {
    event.internal_meeting_id().or_else(|| {
        RAW_MEETING_ID_POINTERS
            .iter()
            .find_map(|pointer| raw.pointer(pointer).and_then(Value::as_str))
    })
}
