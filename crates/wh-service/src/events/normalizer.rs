//! Raw event normalization.
//!
//! Each raw meeting-server message is classified into one category by its
//! message name, then rendered through that category's template. The name
//! is looked for at `header.name`, `envelope.name`, and `data.id`, in that
//! order. Inputs that already carry a canonical kind at `data.id` pass
//! through unchanged; anything unrecognized is dropped.
//!
//! Templates resolve external ids through the correlation registries, so
//! normalization reads only in-memory state and never blocks on storage.

use crate::events::model::{self, CanonicalEvent};
use crate::repositories::{now_millis, IdMappingRepository, UserMappingRepository};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Meeting lifecycle and in-meeting state messages.
const MEETING_EVENTS: [&str; 6] = [
    "MeetingCreatedEvtMsg",
    "MeetingDestroyedEvtMsg",
    "ScreenshareRtmpBroadcastStartedEvtMsg",
    "ScreenshareRtmpBroadcastStoppedEvtMsg",
    "SetCurrentPresentationEvtMsg",
    "RecordingStatusChangedEvtMsg",
];

/// Per-user messages.
const USER_EVENTS: [&str; 12] = [
    "UserJoinedMeetingEvtMsg",
    "UserLeftMeetingEvtMsg",
    "UserMutedVoiceEvtMsg",
    "UserJoinedVoiceConfToClientEvtMsg",
    "UserLeftVoiceConfToClientEvtMsg",
    "PresenterAssignedEvtMsg",
    "PresenterUnassignedEvtMsg",
    "UserBroadcastCamStartedEvtMsg",
    "UserBroadcastCamStoppedEvtMsg",
    "UserEmojiChangedEvtMsg",
    "UserReactionEmojiChangedEvtMsg",
    "UserRaiseHandChangedEvtMsg",
];

const CHAT_EVENTS: [&str; 1] = ["GroupChatMessageBroadcastEvtMsg"];

/// Recording lifecycle messages from the meeting server.
const RAP_EVENTS: [&str; 3] = [
    "PublishedRecordingSysMsg",
    "UnpublishedRecordingSysMsg",
    "DeletedRecordingSysMsg",
];

/// Recording pipeline step messages from the processing workers.
const COMP_RAP_EVENTS: [&str; 17] = [
    "archive_started",
    "archive_ended",
    "sanity_started",
    "sanity_ended",
    "post_archive_started",
    "post_archive_ended",
    "process_started",
    "process_ended",
    "post_process_started",
    "post_process_ended",
    "publish_started",
    "publish_ended",
    "post_publish_started",
    "post_publish_ended",
    "published",
    "unpublished",
    "deleted",
];

const PAD_EVENTS: [&str; 1] = ["PadContentEvtMsg"];

const POLL_EVENTS: [&str; 2] = ["PollStartedEvtMsg", "UserRespondedToPollRespMsg"];

/// Maps raw messages onto [`CanonicalEvent`]s.
pub struct EventNormalizer {
    id_mappings: Arc<IdMappingRepository>,
    user_mappings: Arc<UserMappingRepository>,
}

impl EventNormalizer {
    pub fn new(
        id_mappings: Arc<IdMappingRepository>,
        user_mappings: Arc<UserMappingRepository>,
    ) -> Self {
        Self {
            id_mappings,
            user_mappings,
        }
    }

    /// Normalize a raw message, or drop it.
    ///
    /// Returns `None` for unrecognized names, private chat, and messages
    /// whose template cannot be filled (e.g. a screen-share event for a
    /// meeting with no known presenter).
    pub fn normalize(&self, raw: &Value) -> Option<CanonicalEvent> {
        let output = if matches_category(raw, &MEETING_EVENTS) {
            self.meeting_template(raw)
        } else if matches_category(raw, &USER_EVENTS) {
            self.user_template(raw)
        } else if matches_category(raw, &CHAT_EVENTS) {
            self.chat_template(raw)
        } else if matches_category(raw, &RAP_EVENTS) {
            self.rap_template(raw)
        } else if matches_category(raw, &COMP_RAP_EVENTS) {
            self.comp_rap_template(raw)
        } else if matches_category(raw, &PAD_EVENTS) {
            self.pad_template(raw)
        } else if matches_category(raw, &POLL_EVENTS) {
            self.poll_template(raw)
        } else if matches_category(raw, &model::CANONICAL_KINDS) {
            pass_through(raw)
        } else {
            None
        };

        if let Some(event) = &output {
            debug!(
                target: "wh.events.normalizer",
                event_id = %event.id(),
                "Mapped raw message"
            );
        }
        output
    }

    /// `meeting` attribute map with the external id resolved from the
    /// registry. Unresolvable fields are omitted.
    fn meeting_attributes(&self, internal_meeting_id: Option<&str>) -> Value {
        let mut meeting = Map::new();
        if let Some(internal) = internal_meeting_id {
            meeting.insert("internal-meeting-id".to_string(), json!(internal));
            if let Some(external) = self.id_mappings.external_meeting_id(internal) {
                meeting.insert("external-meeting-id".to_string(), json!(external));
            }
        }
        Value::Object(meeting)
    }

    fn meeting_template(&self, raw: &Value) -> Option<CanonicalEvent> {
        let kind = map_message_kind(raw)?;
        let meeting_id = str_at(raw, "/core/body/meetingId")
            .or_else(|| str_at(raw, "/core/header/meetingId"));

        let mut attributes = Map::new();
        match raw_message_name(raw) {
            Some("MeetingCreatedEvtMsg") => {
                let props = raw.pointer("/core/body/props")?;
                let mut meeting = Map::new();
                insert_present(&mut meeting, "internal-meeting-id", props.pointer("/meetingProp/intId"));
                insert_present(&mut meeting, "external-meeting-id", props.pointer("/meetingProp/extId"));
                insert_present(&mut meeting, "name", props.pointer("/meetingProp/name"));
                insert_present(&mut meeting, "is-breakout", props.pointer("/meetingProp/isBreakout"));
                insert_present(&mut meeting, "parent-id", props.pointer("/breakoutProps/parentId"));
                insert_present(&mut meeting, "duration", props.pointer("/durationProps/duration"));
                insert_present(&mut meeting, "create-time", props.pointer("/durationProps/createdTime"));
                insert_present(&mut meeting, "create-date", props.pointer("/durationProps/createdDate"));
                insert_present(&mut meeting, "moderator-pass", props.pointer("/password/moderatorPass"));
                insert_present(&mut meeting, "viewer-pass", props.pointer("/password/viewerPass"));
                insert_present(&mut meeting, "record", props.pointer("/recordProp/record"));
                insert_present(&mut meeting, "voice-conf", props.pointer("/voiceProp/voiceConf"));
                insert_present(&mut meeting, "dial-number", props.pointer("/voiceProp/dialNumber"));
                insert_present(&mut meeting, "max-users", props.pointer("/usersProp/maxUsers"));
                insert_present(&mut meeting, "metadata", props.pointer("/metadataProp/metadata"));
                attributes.insert("meeting".to_string(), Value::Object(meeting));
            }
            Some("SetCurrentPresentationEvtMsg") => {
                let mut meeting = self.meeting_attributes(meeting_id);
                if let Some(map) = meeting.as_object_mut() {
                    insert_present(map, "presentation-id", raw.pointer("/core/body/presentationId"));
                }
                attributes.insert("meeting".to_string(), meeting);
            }
            Some("ScreenshareRtmpBroadcastStartedEvtMsg") => {
                let presenter = self.user_mappings.meeting_presenter(meeting_id?)?;
                attributes.insert("meeting".to_string(), self.meeting_attributes(meeting_id));
                attributes.insert(
                    "user".to_string(),
                    json!({
                        "internal-user-id": presenter.payload.internal_user_id,
                        "external-user-id": presenter.payload.external_user_id,
                    }),
                );
            }
            Some("ScreenshareRtmpBroadcastStoppedEvtMsg") => {
                let owner = self.user_mappings.meeting_screen_share_owner(meeting_id?)?;
                attributes.insert("meeting".to_string(), self.meeting_attributes(meeting_id));
                attributes.insert(
                    "user".to_string(),
                    json!({
                        "internal-user-id": owner.payload.internal_user_id,
                        "external-user-id": owner.payload.external_user_id,
                    }),
                );
            }
            _ => {
                attributes.insert("meeting".to_string(), self.meeting_attributes(meeting_id));
            }
        }

        Some(CanonicalEvent::new(kind, Value::Object(attributes), now_millis()))
    }

    fn user_template(&self, raw: &Value) -> Option<CanonicalEvent> {
        let kind = map_message_kind(raw)?;
        let user_id = str_at(raw, "/core/header/userId");
        let external_user_id = user_id
            .and_then(|id| self.user_mappings.external_user_id(id))
            .or_else(|| str_at(raw, "/core/body/extId").map(ToString::to_string))
            .unwrap_or_default();

        let mut user = Map::new();
        if let Some(id) = user_id {
            user.insert("internal-user-id".to_string(), json!(id));
        }
        user.insert("external-user-id".to_string(), json!(external_user_id));
        insert_present(&mut user, "name", raw.pointer("/core/body/name"));
        insert_present(&mut user, "role", raw.pointer("/core/body/role"));
        insert_present(&mut user, "presenter", raw.pointer("/core/body/presenter"));
        insert_present(&mut user, "userdata", raw.pointer("/core/body/userdata"));
        insert_present(&mut user, "stream", raw.pointer("/core/body/stream"));

        match kind.as_str() {
            "user-audio-voice-enabled" => {
                let listen_only = raw
                    .pointer("/core/body/listenOnly")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                insert_present(&mut user, "listening-only", raw.pointer("/core/body/listenOnly"));
                user.insert("sharing-mic".to_string(), json!(!listen_only));
                insert_present(&mut user, "muted", raw.pointer("/core/body/muted"));
            }
            "user-audio-voice-disabled" => {
                user.insert("listening-only".to_string(), json!(false));
                user.insert("sharing-mic".to_string(), json!(false));
                user.insert("muted".to_string(), json!(true));
            }
            "user-audio-muted" | "user-audio-unmuted" => {
                insert_present(&mut user, "muted", raw.pointer("/core/body/muted"));
            }
            "user-emoji-changed" => {
                let emoji = str_at(raw, "/core/body/emoji")
                    .or_else(|| str_at(raw, "/core/body/reactionEmoji"))
                    .unwrap_or("none");
                user.insert("emoji".to_string(), json!(emoji));
            }
            "user-raise-hand-changed" => {
                insert_present(&mut user, "raise-hand", raw.pointer("/core/body/raiseHand"));
            }
            "user-joined" | "user-left" => {
                let guest = match raw.pointer("/core/body/guest") {
                    Some(Value::Bool(b)) => *b,
                    Some(Value::String(s)) => s == "true",
                    Some(Value::Null) | None => {
                        user_id.is_some_and(|id| self.user_mappings.is_guest(id))
                    }
                    Some(_) => false,
                };
                user.insert("guest".to_string(), json!(guest));
            }
            _ => {}
        }

        let meeting_id = str_at(raw, "/envelope/routing/meetingId")
            .or_else(|| str_at(raw, "/core/header/meetingId"));
        let attributes = json!({
            "meeting": self.meeting_attributes(meeting_id),
            "user": Value::Object(user),
        });
        Some(CanonicalEvent::new(kind, attributes, now_millis()))
    }

    fn chat_template(&self, raw: &Value) -> Option<CanonicalEvent> {
        // Private chats are not forwarded
        if str_at(raw, "/core/body/chatId") != Some("MAIN-PUBLIC-GROUP-CHAT") {
            return None;
        }

        let kind = map_message_kind(raw)?;
        let mut sender = Map::new();
        insert_present(&mut sender, "internal-user-id", raw.pointer("/core/body/msg/sender/id"));
        insert_present(&mut sender, "name", raw.pointer("/core/body/msg/sender/name"));
        insert_present(&mut sender, "time", raw.pointer("/core/body/msg/timestamp"));

        let mut chat_message = Map::new();
        insert_present(&mut chat_message, "id", raw.pointer("/core/body/msg/id"));
        insert_present(&mut chat_message, "message", raw.pointer("/core/body/msg/message"));
        chat_message.insert("sender".to_string(), Value::Object(sender));

        let meeting_id = str_at(raw, "/envelope/routing/meetingId");
        let mut attributes = Map::new();
        attributes.insert("meeting".to_string(), self.meeting_attributes(meeting_id));
        attributes.insert("chat-message".to_string(), Value::Object(chat_message));
        insert_present(&mut attributes, "chat-id", raw.pointer("/core/body/chatId"));

        Some(CanonicalEvent::new(kind, Value::Object(attributes), now_millis()))
    }

    fn rap_template(&self, raw: &Value) -> Option<CanonicalEvent> {
        let kind = map_message_kind(raw)?;
        let record_id = str_at(raw, "/core/body/recordId");

        // The record id doubles as the internal meeting id on these messages
        let mut meeting = Map::new();
        insert_present(&mut meeting, "internal-meeting-id", raw.pointer("/core/body/internalMeetingId"));
        if let Some(external) = record_id.and_then(|id| self.id_mappings.external_meeting_id(id)) {
            meeting.insert("external-meeting-id".to_string(), json!(external));
        }

        let mut attributes = Map::new();
        attributes.insert("meeting".to_string(), Value::Object(meeting));
        insert_present(&mut attributes, "record-id", raw.pointer("/core/body/recordId"));

        Some(CanonicalEvent::new(kind, Value::Object(attributes), now_millis()))
    }

    fn comp_rap_template(&self, raw: &Value) -> Option<CanonicalEvent> {
        let kind = map_message_kind(raw)?;
        let meeting_id = str_at(raw, "/payload/meeting_id");

        let mut meeting = Map::new();
        if let Some(internal) = meeting_id {
            meeting.insert("internal-meeting-id".to_string(), json!(internal));
        }
        let external = str_at(raw, "/payload/external_meeting_id")
            .map(ToString::to_string)
            .or_else(|| meeting_id.and_then(|id| self.id_mappings.external_meeting_id(id)));
        if let Some(external) = external {
            meeting.insert("external-meeting-id".to_string(), json!(external));
        }

        let mut attributes = Map::new();
        attributes.insert("meeting".to_string(), Value::Object(meeting));

        match kind.as_str() {
            "rap-published" | "rap-unpublished" | "rap-deleted" => {
                insert_present(&mut attributes, "record-id", raw.pointer("/payload/meeting_id"));
                insert_present(&mut attributes, "format", raw.pointer("/payload/format"));
            }
            _ => {
                insert_present(&mut attributes, "record-id", raw.pointer("/payload/record_id"));
                insert_present(&mut attributes, "success", raw.pointer("/payload/success"));
                insert_present(&mut attributes, "step-time", raw.pointer("/payload/step_time"));
            }
        }

        if kind == "rap-archive-ended" {
            let recorded = raw
                .pointer("/payload/recorded")
                .cloned()
                .unwrap_or(json!(false));
            let duration = raw
                .pointer("/payload/duration")
                .cloned()
                .unwrap_or(json!(0));
            attributes.insert("recorded".to_string(), recorded);
            attributes.insert("duration".to_string(), duration);
        }

        insert_present(&mut attributes, "workflow", raw.pointer("/payload/workflow"));

        if kind == "rap-publish-ended" {
            let mut recording = Map::new();
            insert_present(&mut recording, "name", raw.pointer("/payload/metadata/meetingName"));
            insert_present(&mut recording, "is-breakout", raw.pointer("/payload/metadata/isBreakout"));
            insert_present(&mut recording, "start-time", raw.pointer("/payload/start_time"));
            insert_present(&mut recording, "end-time", raw.pointer("/payload/end_time"));
            insert_present(&mut recording, "size", raw.pointer("/payload/playback/size"));
            insert_present(&mut recording, "raw-size", raw.pointer("/payload/raw_size"));
            insert_present(&mut recording, "metadata", raw.pointer("/payload/metadata"));
            insert_present(&mut recording, "playback", raw.pointer("/payload/playback"));
            insert_present(&mut recording, "download", raw.pointer("/payload/download"));
            attributes.insert("recording".to_string(), Value::Object(recording));
        }

        // Pipeline steps stamp their own wall clock
        let ts = raw
            .pointer("/header/current_time")
            .and_then(Value::as_i64)
            .unwrap_or_else(now_millis);
        Some(CanonicalEvent::new(kind, Value::Object(attributes), ts))
    }

    fn pad_template(&self, raw: &Value) -> Option<CanonicalEvent> {
        let kind = map_message_kind(raw)?;

        let mut pad = Map::new();
        insert_present(&mut pad, "id", raw.pointer("/core/body/padId"));
        insert_present(&mut pad, "external-pad-id", raw.pointer("/core/body/externalId"));
        insert_present(&mut pad, "rev", raw.pointer("/core/body/rev"));
        insert_present(&mut pad, "start", raw.pointer("/core/body/start"));
        insert_present(&mut pad, "end", raw.pointer("/core/body/end"));
        insert_present(&mut pad, "text", raw.pointer("/core/body/text"));

        let meeting_id = str_at(raw, "/core/header/meetingId");
        let attributes = json!({
            "meeting": self.meeting_attributes(meeting_id),
            "pad": Value::Object(pad),
        });
        Some(CanonicalEvent::new(kind, attributes, now_millis()))
    }

    fn poll_template(&self, raw: &Value) -> Option<CanonicalEvent> {
        let kind = map_message_kind(raw)?;
        let user_id = str_at(raw, "/core/header/userId");
        let external_user_id = user_id
            .and_then(|id| self.user_mappings.external_user_id(id))
            .or_else(|| str_at(raw, "/core/body/extId").map(ToString::to_string))
            .unwrap_or_default();

        let mut user = Map::new();
        if let Some(id) = user_id {
            user.insert("internal-user-id".to_string(), json!(id));
        }
        user.insert("external-user-id".to_string(), json!(external_user_id));

        let mut poll = Map::new();
        let poll_id = raw
            .pointer("/core/body/pollId")
            .or_else(|| raw.pointer("/core/body/poll/id"));
        insert_present(&mut poll, "id", poll_id);
        match kind.as_str() {
            "poll-started" => {
                insert_present(&mut poll, "question", raw.pointer("/core/body/question"));
                insert_present(&mut poll, "answers", raw.pointer("/core/body/poll/answers"));
            }
            "poll-responded" => {
                insert_present(&mut poll, "answerIds", raw.pointer("/core/body/answerIds"));
            }
            _ => {}
        }

        let meeting_id = str_at(raw, "/envelope/routing/meetingId");
        let attributes = json!({
            "meeting": self.meeting_attributes(meeting_id),
            "user": Value::Object(user),
            "poll": Value::Object(poll),
        });
        Some(CanonicalEvent::new(kind, attributes, now_millis()))
    }
}

/// Whether the message's name, wherever it sits, is in `names`.
fn matches_category(raw: &Value, names: &[&str]) -> bool {
    names.iter().any(|name| {
        str_at(raw, "/header/name") == Some(name)
            || str_at(raw, "/envelope/name") == Some(name)
            || str_at(raw, "/data/id") == Some(name)
    })
}

/// The raw message name, preferring the envelope over the header.
fn raw_message_name(raw: &Value) -> Option<&str> {
    str_at(raw, "/envelope/name").or_else(|| str_at(raw, "/header/name"))
}

fn str_at<'a>(raw: &'a Value, pointer: &str) -> Option<&'a str> {
    raw.pointer(pointer).and_then(Value::as_str)
}

/// Insert `value` under `key` if the raw message carries it.
fn insert_present(map: &mut Map<String, Value>, key: &str, value: Option<&Value>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.clone());
    }
}

/// Map a raw message name to its canonical kind.
fn map_message_kind(raw: &Value) -> Option<String> {
    let name = raw_message_name(raw)?;
    let kind = match name {
        "MeetingCreatedEvtMsg" => "meeting-created",
        "MeetingDestroyedEvtMsg" => "meeting-ended",
        "RecordingStatusChangedEvtMsg" => recording_status_kind(raw),
        "ScreenshareRtmpBroadcastStartedEvtMsg" => "meeting-screenshare-started",
        "ScreenshareRtmpBroadcastStoppedEvtMsg" => "meeting-screenshare-stopped",
        "SetCurrentPresentationEvtMsg" => "meeting-presentation-changed",
        "UserJoinedMeetingEvtMsg" => "user-joined",
        "UserLeftMeetingEvtMsg" => "user-left",
        "UserJoinedVoiceConfToClientEvtMsg" => "user-audio-voice-enabled",
        "UserLeftVoiceConfToClientEvtMsg" => "user-audio-voice-disabled",
        "UserMutedVoiceEvtMsg" => muted_voice_kind(raw),
        "UserBroadcastCamStartedEvtMsg" => "user-cam-broadcast-start",
        "UserBroadcastCamStoppedEvtMsg" => "user-cam-broadcast-end",
        "PresenterAssignedEvtMsg" => "user-presenter-assigned",
        "PresenterUnassignedEvtMsg" => "user-presenter-unassigned",
        "UserEmojiChangedEvtMsg" | "UserReactionEmojiChangedEvtMsg" => "user-emoji-changed",
        "UserRaiseHandChangedEvtMsg" => "user-raise-hand-changed",
        "GroupChatMessageBroadcastEvtMsg" => "chat-group-message-sent",
        "PublishedRecordingSysMsg" => "rap-published",
        "UnpublishedRecordingSysMsg" => "rap-unpublished",
        "DeletedRecordingSysMsg" => "rap-deleted",
        "PadContentEvtMsg" => "pad-content",
        "PollStartedEvtMsg" => "poll-started",
        "UserRespondedToPollRespMsg" => "poll-responded",
        "archive_started" => "rap-archive-started",
        "archive_ended" => "rap-archive-ended",
        "sanity_started" => "rap-sanity-started",
        "sanity_ended" => "rap-sanity-ended",
        "post_archive_started" => "rap-post-archive-started",
        "post_archive_ended" => "rap-post-archive-ended",
        "process_started" => "rap-process-started",
        "process_ended" => "rap-process-ended",
        "post_process_started" => "rap-post-process-started",
        "post_process_ended" => "rap-post-process-ended",
        "publish_started" => "rap-publish-started",
        "publish_ended" => "rap-publish-ended",
        "post_publish_started" => "rap-post-publish-started",
        "post_publish_ended" => "rap-post-publish-ended",
        "published" => "rap-published",
        "unpublished" => "rap-unpublished",
        "deleted" => "rap-deleted",
        _ => return None,
    };
    Some(kind.to_string())
}

/// Mute toggles share one raw message; the boolean decides the kind.
fn muted_voice_kind(raw: &Value) -> &'static str {
    match raw.pointer("/core/body/muted").and_then(Value::as_bool) {
        Some(true) => "user-audio-muted",
        Some(false) => "user-audio-unmuted",
        None => "user-audio-unhandled",
    }
}

fn recording_status_kind(raw: &Value) -> &'static str {
    match raw.pointer("/core/body/recording").and_then(Value::as_bool) {
        Some(true) => "meeting-recording-started",
        Some(false) => "meeting-recording-stopped",
        None => "meeting-recording-unhandled",
    }
}

/// Re-emit an already-canonical input untouched.
fn pass_through(raw: &Value) -> Option<CanonicalEvent> {
    match serde_json::from_value(raw.clone()) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(
                target: "wh.events.normalizer",
                error = %e,
                "Input claims a canonical kind but does not parse"
            );
            None
        }
    }
}
