//! Canonical event shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every canonical event kind the service emits.
///
/// Inputs whose `data.id` is already one of these pass through the
/// normalizer unchanged; receivers may filter on them, lowercased, at hook
/// registration.
pub const CANONICAL_KINDS: [&str; 42] = [
    "meeting-created",
    "meeting-ended",
    "meeting-recording-started",
    "meeting-recording-stopped",
    "meeting-recording-unhandled",
    "meeting-screenshare-started",
    "meeting-screenshare-stopped",
    "meeting-presentation-changed",
    "user-joined",
    "user-left",
    "user-audio-voice-enabled",
    "user-audio-voice-disabled",
    "user-audio-muted",
    "user-audio-unmuted",
    "user-audio-unhandled",
    "user-cam-broadcast-start",
    "user-cam-broadcast-end",
    "user-presenter-assigned",
    "user-presenter-unassigned",
    "user-emoji-changed",
    "user-raise-hand-changed",
    "chat-group-message-sent",
    "rap-published",
    "rap-unpublished",
    "rap-deleted",
    "pad-content",
    "rap-archive-started",
    "rap-archive-ended",
    "rap-sanity-started",
    "rap-sanity-ended",
    "rap-post-archive-started",
    "rap-post-archive-ended",
    "rap-process-started",
    "rap-process-ended",
    "rap-post-process-started",
    "rap-post-process-ended",
    "rap-publish-started",
    "rap-publish-ended",
    "rap-post-publish-started",
    "rap-post-publish-ended",
    "poll-started",
    "poll-responded",
];

/// Whether `kind` is a canonical event kind.
#[must_use]
pub fn is_canonical_kind(kind: &str) -> bool {
    CANONICAL_KINDS.contains(&kind)
}

fn default_event_type() -> String {
    "event".to_string()
}

/// A normalized event as delivered to receivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    /// Always "event".
    #[serde(rename = "type", default = "default_event_type")]
    pub event_type: String,

    /// The canonical kind, e.g. "user-joined".
    pub id: String,

    /// Kind-specific attribute map.
    #[serde(default)]
    pub attributes: Value,

    #[serde(default)]
    pub event: EventStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventStamp {
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub ts: i64,
}

impl CanonicalEvent {
    pub fn new(id: impl Into<String>, attributes: Value, ts: i64) -> Self {
        Self {
            data: EventData {
                event_type: default_event_type(),
                id: id.into(),
                attributes,
                event: EventStamp { ts },
            },
        }
    }

    /// The canonical kind of this event.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.data.id
    }

    #[must_use]
    pub fn internal_meeting_id(&self) -> Option<&str> {
        self.data
            .attributes
            .pointer("/meeting/internal-meeting-id")
            .and_then(Value::as_str)
    }

    #[must_use]
    pub fn external_meeting_id(&self) -> Option<&str> {
        self.data
            .attributes
            .pointer("/meeting/external-meeting-id")
            .and_then(Value::as_str)
    }

    #[must_use]
    pub fn internal_user_id(&self) -> Option<&str> {
        self.data
            .attributes
            .pointer("/user/internal-user-id")
            .and_then(Value::as_str)
    }

    /// The event's user attribute map, if it has one.
    #[must_use]
    pub fn user_attributes(&self) -> Option<&Value> {
        self.data.attributes.get("user")
    }
}
