//! Event processing pipeline.
//!
//! One instance sits between the inbound sources and the output consumers.
//! Each raw message is normalized, registry side effects are applied, and
//! the event is then fanned out to every registered consumer. Side effects
//! always land before fan-out so consumers observe up-to-date mappings;
//! side-effect failures are logged and never block the stream.

use crate::errors::WhError;
use crate::events::{CanonicalEvent, EventNormalizer};
use crate::observability::metrics;
use crate::repositories::{now_millis, IdMappingRepository, UserMappingRepository};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// A fan-out target for processed events.
///
/// Every consumer sees every event, both the canonical rendering and the
/// raw message it came from, and decides relevance on its own.
#[async_trait]
pub trait OutputConsumer: Send + Sync {
    async fn on_event(&self, event: &CanonicalEvent, raw: &Value) -> Result<(), WhError>;
}

/// Normalizes inbound messages and drives registry updates plus fan-out.
pub struct EventProcessor {
    normalizer: EventNormalizer,
    id_mappings: Arc<IdMappingRepository>,
    user_mappings: Arc<UserMappingRepository>,
    outputs: Vec<Arc<dyn OutputConsumer>>,
}

impl EventProcessor {
    pub fn new(
        normalizer: EventNormalizer,
        id_mappings: Arc<IdMappingRepository>,
        user_mappings: Arc<UserMappingRepository>,
        outputs: Vec<Arc<dyn OutputConsumer>>,
    ) -> Self {
        Self {
            normalizer,
            id_mappings,
            user_mappings,
            outputs,
        }
    }

    /// Entry point for inbound sources delivering JSON text.
    #[instrument(skip_all)]
    pub async fn process_input_event(&self, payload: &str) {
        match serde_json::from_str::<Value>(payload) {
            Ok(raw) => self.process_raw_value(raw).await,
            Err(e) => {
                warn!(
                    target: "wh.processor",
                    error = %e,
                    "Discarding unparseable input"
                );
                metrics::record_event_discarded("unparseable");
            }
        }
    }

    /// Process an already-parsed raw message.
    pub async fn process_raw_value(&self, raw: Value) {
        let Some(event) = self.normalizer.normalize(&raw) else {
            debug!(target: "wh.processor", "Discarding unrecognized input");
            metrics::record_event_discarded("unrecognized");
            return;
        };

        if let Some(internal) = event.internal_meeting_id() {
            if let Err(e) = self.id_mappings.report_activity(internal).await {
                warn!(
                    target: "wh.processor",
                    error = %e,
                    meeting_id = %internal,
                    "Failed to report meeting activity"
                );
            }
        }

        let mut synthesized_before = Vec::new();
        let mut synthesized_after = Vec::new();
        self.apply_registry_effects(&event, &raw, &mut synthesized_before, &mut synthesized_after)
            .await;

        for extra in &synthesized_before {
            self.fan_out(extra, &raw).await;
        }
        self.fan_out(&event, &raw).await;
        for extra in &synthesized_after {
            self.fan_out(extra, &raw).await;
        }

        metrics::record_event_processed(event.id());
    }

    /// Mutate the registries according to the event kind. Extra events to
    /// emit around the triggering one are pushed onto `before` / `after`.
    async fn apply_registry_effects(
        &self,
        event: &CanonicalEvent,
        raw: &Value,
        before: &mut Vec<CanonicalEvent>,
        after: &mut Vec<CanonicalEvent>,
    ) {
        match event.id() {
            "meeting-created" => {
                let Some(internal) = event.internal_meeting_id() else {
                    warn!(target: "wh.processor", "meeting-created without an internal id");
                    return;
                };
                let external = event.external_meeting_id().unwrap_or_default();
                if let Err(e) = self.id_mappings.add_or_update(internal, external).await {
                    error!(
                        target: "wh.processor",
                        error = %e,
                        meeting_id = %internal,
                        "Failed to add meeting mapping"
                    );
                }
            }
            "user-joined" => {
                let Some(user_id) = event.internal_user_id() else {
                    warn!(target: "wh.processor", "user-joined without an internal user id");
                    return;
                };
                let user = event
                    .user_attributes()
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                let external = user
                    .get("external-user-id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let meeting = event.internal_meeting_id().unwrap_or_default();
                if let Err(e) = self
                    .user_mappings
                    .add_or_update(user_id, &external, meeting, user)
                    .await
                {
                    error!(
                        target: "wh.processor",
                        error = %e,
                        user_id = %user_id,
                        "Failed to add user mapping"
                    );
                }
            }
            "user-left" => {
                if let Some(user_id) = event.internal_user_id() {
                    if let Err(e) = self.user_mappings.remove(user_id).await {
                        error!(
                            target: "wh.processor",
                            error = %e,
                            user_id = %user_id,
                            "Failed to remove user mapping"
                        );
                    }
                }
            }
            "meeting-ended" => {
                let Some(internal) = event.internal_meeting_id() else {
                    return;
                };
                // The platform does not emit per-user leave events on
                // teardown; spoof them so consumer user state stays
                // consistent.
                let meeting_attributes = event
                    .data
                    .attributes
                    .get("meeting")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                for mapping in self.user_mappings.users_for_meeting(internal) {
                    if let Err(e) = self
                        .user_mappings
                        .remove(&mapping.payload.internal_user_id)
                        .await
                    {
                        error!(
                            target: "wh.processor",
                            error = %e,
                            user_id = %mapping.payload.internal_user_id,
                            "Failed to remove user mapping on meeting end"
                        );
                    }
                    let attributes = json!({
                        "meeting": meeting_attributes.clone(),
                        "user": mapping.payload.user,
                    });
                    before.push(CanonicalEvent::new("user-left", attributes, now_millis()));
                }
                if let Err(e) = self.id_mappings.remove(internal).await {
                    error!(
                        target: "wh.processor",
                        error = %e,
                        meeting_id = %internal,
                        "Failed to remove meeting mapping"
                    );
                }
            }
            "user-presenter-assigned" => {
                let new_presenter = raw
                    .pointer("/core/body/presenterId")
                    .and_then(Value::as_str)
                    .or_else(|| event.internal_user_id());
                if let Some(previous) = event
                    .internal_meeting_id()
                    .and_then(|meeting| self.user_mappings.meeting_presenter(meeting))
                {
                    if Some(previous.payload.internal_user_id.as_str()) != new_presenter {
                        self.patch_user(
                            &previous.payload.internal_user_id,
                            &[("presenter", json!(false))],
                        )
                        .await;
                    }
                }
                if let Some(user_id) = new_presenter {
                    self.patch_user(user_id, &[("presenter", json!(true))]).await;
                }
            }
            "user-presenter-unassigned" => {
                let target = raw
                    .pointer("/core/body/intId")
                    .and_then(Value::as_str)
                    .or_else(|| event.internal_user_id());
                if let Some(user_id) = target {
                    self.patch_user(user_id, &[("presenter", json!(false))]).await;
                }
            }
            "meeting-screenshare-started" => {
                let Some(user_id) = event.internal_user_id() else {
                    return;
                };
                // at most one flagged owner per meeting
                if let Some(current) = event
                    .internal_meeting_id()
                    .and_then(|meeting| self.user_mappings.meeting_screen_share_owner(meeting))
                {
                    if current.payload.internal_user_id != user_id {
                        self.patch_user(
                            &current.payload.internal_user_id,
                            &[("screenshare", json!(false))],
                        )
                        .await;
                    }
                }
                self.patch_user(user_id, &[("screenshare", json!(true))]).await;
            }
            "meeting-screenshare-stopped" => {
                if let Some(user_id) = event.internal_user_id() {
                    self.patch_user(user_id, &[("screenshare", json!(false))]).await;
                }
            }
            "user-emoji-changed" => {
                let Some(user_id) = event.internal_user_id() else {
                    return;
                };
                let user = event.user_attributes();
                let emoji = user
                    .and_then(|u| u.get("emoji"))
                    .and_then(Value::as_str)
                    .unwrap_or("none");
                let raised = emoji == "raiseHand";
                let was_raised = self
                    .user_mappings
                    .get_user(user_id)
                    .and_then(|u| u.get("raise-hand").and_then(Value::as_bool))
                    .unwrap_or(false);

                if raised == was_raised {
                    self.patch_user(user_id, &[("emoji", json!(emoji))]).await;
                    return;
                }

                self.patch_user(
                    user_id,
                    &[("emoji", json!(emoji)), ("raise-hand", json!(raised))],
                )
                .await;

                // Older protocol versions only signal raised hands through
                // the emoji; emit the dedicated event on each transition.
                let external = user
                    .and_then(|u| u.get("external-user-id"))
                    .cloned()
                    .unwrap_or_else(|| json!(""));
                let attributes = json!({
                    "meeting": event.data.attributes.get("meeting").cloned().unwrap_or_else(|| json!({})),
                    "user": {
                        "internal-user-id": user_id,
                        "external-user-id": external,
                        "raise-hand": raised,
                    },
                });
                after.push(CanonicalEvent::new(
                    "user-raise-hand-changed",
                    attributes,
                    now_millis(),
                ));
            }
            "user-raise-hand-changed" => {
                if let Some(user_id) = event.internal_user_id() {
                    let raised = event
                        .user_attributes()
                        .and_then(|u| u.get("raise-hand"))
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    self.patch_user(user_id, &[("raise-hand", json!(raised))]).await;
                }
            }
            _ => {}
        }
    }

    async fn patch_user(&self, internal_user_id: &str, fields: &[(&str, Value)]) {
        if let Err(e) = self.user_mappings.patch_user_fields(internal_user_id, fields).await {
            error!(
                target: "wh.processor",
                error = %e,
                user_id = %internal_user_id,
                "Failed to patch user mapping"
            );
        }
    }

    async fn fan_out(&self, event: &CanonicalEvent, raw: &Value) {
        if self.outputs.is_empty() {
            warn!(target: "wh.processor", "No output consumers registered");
            return;
        }
        for output in &self.outputs {
            if let Err(e) = output.on_event(event, raw).await {
                error!(
                    target: "wh.processor",
                    error = %e,
                    event_id = %event.id(),
                    "Output consumer failed"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repositories::{IdMappingRepository, UserMappingRepository};
    use crate::storage::{KeyValueStore, MemoryStore};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<CanonicalEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl OutputConsumer for Recorder {
        async fn on_event(&self, event: &CanonicalEvent, _raw: &Value) -> Result<(), WhError> {
            self.events.lock().await.push(event.clone());
            if self.fail {
                return Err(WhError::Delivery("recorder configured to fail".to_string()));
            }
            Ok(())
        }
    }

    struct Fixture {
        processor: EventProcessor,
        id_mappings: Arc<IdMappingRepository>,
        user_mappings: Arc<UserMappingRepository>,
        recorder: Arc<Recorder>,
    }

    fn fixture_with_outputs(extra: Vec<Arc<dyn OutputConsumer>>) -> Fixture {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let id_mappings = Arc::new(IdMappingRepository::new(Arc::clone(&store), "test"));
        let user_mappings = Arc::new(UserMappingRepository::new(store, "test"));
        let recorder = Arc::new(Recorder::default());

        let mut outputs = extra;
        outputs.push(Arc::clone(&recorder) as Arc<dyn OutputConsumer>);

        let normalizer =
            EventNormalizer::new(Arc::clone(&id_mappings), Arc::clone(&user_mappings));
        let processor = EventProcessor::new(
            normalizer,
            Arc::clone(&id_mappings),
            Arc::clone(&user_mappings),
            outputs,
        );
        Fixture {
            processor,
            id_mappings,
            user_mappings,
            recorder,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_outputs(Vec::new())
    }

    fn meeting_created_raw(internal: &str, external: &str) -> Value {
        json!({
            "envelope": { "name": "MeetingCreatedEvtMsg", "routing": {} },
            "core": {
                "header": { "name": "MeetingCreatedEvtMsg" },
                "body": { "props": { "meetingProp": { "intId": internal, "extId": external, "name": "Demo" } } },
            },
        })
    }

    fn user_joined_raw(meeting: &str, user: &str) -> Value {
        json!({
            "envelope": { "name": "UserJoinedMeetingEvtMsg", "routing": { "meetingId": meeting } },
            "core": {
                "header": { "name": "UserJoinedMeetingEvtMsg", "userId": user },
                "body": { "extId": format!("ext-{user}"), "name": user, "role": "VIEWER", "guest": false },
            },
        })
    }

    fn meeting_ended_raw(meeting: &str) -> Value {
        json!({
            "envelope": { "name": "MeetingDestroyedEvtMsg", "routing": {} },
            "core": { "header": { "name": "MeetingDestroyedEvtMsg" }, "body": { "meetingId": meeting } },
        })
    }

    fn emoji_raw(meeting: &str, user: &str, emoji: &str) -> Value {
        json!({
            "envelope": { "name": "UserEmojiChangedEvtMsg", "routing": { "meetingId": meeting } },
            "core": {
                "header": { "name": "UserEmojiChangedEvtMsg", "userId": user },
                "body": { "emoji": emoji },
            },
        })
    }

    #[tokio::test]
    async fn test_meeting_created_registers_mapping_before_fan_out() {
        let f = fixture();
        f.processor
            .process_raw_value(meeting_created_raw("int-1", "ext-1"))
            .await;

        assert_eq!(
            f.id_mappings.external_meeting_id("int-1"),
            Some("ext-1".to_string())
        );
        let events = f.recorder.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events.first().unwrap().id(), "meeting-created");
    }

    #[tokio::test]
    async fn test_user_joined_registers_user_mapping() {
        let f = fixture();
        f.processor
            .process_raw_value(meeting_created_raw("int-1", "ext-1"))
            .await;
        f.processor
            .process_raw_value(user_joined_raw("int-1", "user-1"))
            .await;

        let user = f.user_mappings.get_user("user-1").unwrap();
        assert_eq!(user["name"], "user-1");
        assert_eq!(
            f.user_mappings.external_user_id("user-1"),
            Some("ext-user-1".to_string())
        );

        // the stored blob resolves the external meeting id registered above
        let events = f.recorder.events.lock().await;
        assert_eq!(events.get(1).unwrap().external_meeting_id(), Some("ext-1"));
    }

    #[tokio::test]
    async fn test_meeting_ended_cascade_synthesizes_user_left() {
        let f = fixture();
        f.processor
            .process_raw_value(meeting_created_raw("int-1", "ext-1"))
            .await;
        f.processor
            .process_raw_value(user_joined_raw("int-1", "user-1"))
            .await;
        f.processor
            .process_raw_value(user_joined_raw("int-1", "user-2"))
            .await;
        f.processor.process_raw_value(meeting_ended_raw("int-1")).await;

        assert!(f.id_mappings.external_meeting_id("int-1").is_none());
        assert!(f.user_mappings.get_user("user-1").is_none());
        assert!(f.user_mappings.get_user("user-2").is_none());

        let events = f.recorder.events.lock().await;
        let kinds: Vec<&str> = events.iter().map(CanonicalEvent::id).collect();
        assert_eq!(
            kinds,
            vec![
                "meeting-created",
                "user-joined",
                "user-joined",
                "user-left",
                "user-left",
                "meeting-ended"
            ]
        );
        // synthesized leaves carry the stored user identity
        let left: Vec<Option<&str>> = events
            .iter()
            .skip(3)
            .take(2)
            .map(CanonicalEvent::internal_user_id)
            .collect();
        assert!(left.contains(&Some("user-1")));
        assert!(left.contains(&Some("user-2")));
    }

    #[tokio::test]
    async fn test_presenter_reassignment_moves_the_flag() {
        let f = fixture();
        f.processor
            .process_raw_value(meeting_created_raw("int-1", "ext-1"))
            .await;
        f.processor
            .process_raw_value(user_joined_raw("int-1", "user-1"))
            .await;
        f.processor
            .process_raw_value(user_joined_raw("int-1", "user-2"))
            .await;

        let assign = |user: &str| {
            json!({
                "envelope": { "name": "PresenterAssignedEvtMsg", "routing": { "meetingId": "int-1" } },
                "core": {
                    "header": { "name": "PresenterAssignedEvtMsg", "userId": user },
                    "body": { "presenterId": user },
                },
            })
        };

        f.processor.process_raw_value(assign("user-1")).await;
        assert_eq!(
            f.user_mappings
                .meeting_presenter("int-1")
                .unwrap()
                .payload
                .internal_user_id,
            "user-1"
        );

        f.processor.process_raw_value(assign("user-2")).await;
        let presenter = f.user_mappings.meeting_presenter("int-1").unwrap();
        assert_eq!(presenter.payload.internal_user_id, "user-2");
        // the old presenter's flag was cleared, so exactly one remains
        let flagged = f
            .user_mappings
            .users_for_meeting("int-1")
            .into_iter()
            .filter(|m| m.payload.user["presenter"] == json!(true))
            .count();
        assert_eq!(flagged, 1);
    }

    #[tokio::test]
    async fn test_emoji_raise_hand_transition_synthesizes_event() {
        let f = fixture();
        f.processor
            .process_raw_value(meeting_created_raw("int-1", "ext-1"))
            .await;
        f.processor
            .process_raw_value(user_joined_raw("int-1", "user-1"))
            .await;

        f.processor
            .process_raw_value(emoji_raw("int-1", "user-1", "raiseHand"))
            .await;
        {
            let events = f.recorder.events.lock().await;
            let kinds: Vec<&str> = events.iter().map(CanonicalEvent::id).collect();
            assert_eq!(
                kinds,
                vec![
                    "meeting-created",
                    "user-joined",
                    "user-emoji-changed",
                    "user-raise-hand-changed"
                ]
            );
            let raise = events.last().unwrap();
            assert_eq!(
                raise.user_attributes().unwrap()["raise-hand"],
                json!(true)
            );
        }
        let user = f.user_mappings.get_user("user-1").unwrap();
        assert_eq!(user["raise-hand"], json!(true));

        // Same emoji again: no transition, no synthesized event
        f.processor
            .process_raw_value(emoji_raw("int-1", "user-1", "raiseHand"))
            .await;
        {
            let events = f.recorder.events.lock().await;
            assert_eq!(events.len(), 5);
            assert_eq!(events.last().unwrap().id(), "user-emoji-changed");
        }

        // Lowering the hand emits the transition again
        f.processor
            .process_raw_value(emoji_raw("int-1", "user-1", "none"))
            .await;
        let events = f.recorder.events.lock().await;
        assert_eq!(events.last().unwrap().id(), "user-raise-hand-changed");
        assert_eq!(
            events.last().unwrap().user_attributes().unwrap()["raise-hand"],
            json!(false)
        );
    }

    #[tokio::test]
    async fn test_screenshare_flag_follows_events() {
        let f = fixture();
        f.processor
            .process_raw_value(meeting_created_raw("int-1", "ext-1"))
            .await;
        f.processor
            .process_raw_value(user_joined_raw("int-1", "user-1"))
            .await;
        f.processor
            .process_raw_value(
                json!({
                    "envelope": { "name": "PresenterAssignedEvtMsg", "routing": { "meetingId": "int-1" } },
                    "core": {
                        "header": { "name": "PresenterAssignedEvtMsg", "userId": "user-1" },
                        "body": { "presenterId": "user-1" },
                    },
                }),
            )
            .await;

        let started = json!({
            "envelope": { "name": "ScreenshareRtmpBroadcastStartedEvtMsg", "routing": {} },
            "core": {
                "header": { "name": "ScreenshareRtmpBroadcastStartedEvtMsg" },
                "body": { "meetingId": "int-1" },
            },
        });
        f.processor.process_raw_value(started).await;
        assert_eq!(
            f.user_mappings
                .meeting_screen_share_owner("int-1")
                .unwrap()
                .payload
                .internal_user_id,
            "user-1"
        );

        let stopped = json!({
            "envelope": { "name": "ScreenshareRtmpBroadcastStoppedEvtMsg", "routing": {} },
            "core": {
                "header": { "name": "ScreenshareRtmpBroadcastStoppedEvtMsg" },
                "body": { "meetingId": "int-1" },
            },
        });
        f.processor.process_raw_value(stopped).await;
        assert!(f.user_mappings.meeting_screen_share_owner("int-1").is_none());
    }

    #[tokio::test]
    async fn test_consumer_error_does_not_stop_remaining_consumers() {
        let failing = Arc::new(Recorder {
            events: Mutex::new(Vec::new()),
            fail: true,
        });
        let f = fixture_with_outputs(vec![Arc::clone(&failing) as Arc<dyn OutputConsumer>]);

        f.processor
            .process_raw_value(meeting_created_raw("int-1", "ext-1"))
            .await;

        assert_eq!(failing.events.lock().await.len(), 1);
        assert_eq!(f.recorder.events.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_and_unrecognized_inputs_are_dropped() {
        let f = fixture();
        f.processor.process_input_event("{not json").await;
        f.processor
            .process_input_event(r#"{"envelope": {"name": "NoSuchMsg"}}"#)
            .await;
        assert!(f.recorder.events.lock().await.is_empty());
    }
}
