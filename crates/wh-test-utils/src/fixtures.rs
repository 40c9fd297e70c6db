//! Raw server message fixtures.
//!
//! Builders for the wire shapes the normalizer consumes: meeting server
//! messages carry `envelope`/`core` sections, recording pipeline messages
//! carry `header`/`payload`. Values are minimal but complete enough for the
//! corresponding canonical template.

use serde_json::{json, Value};
use uuid::Uuid;

/// A unique internal meeting id.
#[must_use]
pub fn unique_meeting_id() -> String {
    format!("int-{}", Uuid::new_v4())
}

/// A unique internal user id.
#[must_use]
pub fn unique_user_id() -> String {
    format!("user-{}", Uuid::new_v4())
}

#[must_use]
pub fn meeting_created_raw(internal: &str, external: &str) -> Value {
    json!({
        "envelope": { "name": "MeetingCreatedEvtMsg", "routing": {} },
        "core": {
            "header": { "name": "MeetingCreatedEvtMsg" },
            "body": {
                "props": {
                    "meetingProp": {
                        "intId": internal,
                        "extId": external,
                        "name": "Demo Meeting",
                        "isBreakout": false,
                    },
                    "durationProps": { "duration": 0, "createdTime": 1_700_000_000_000_i64 },
                    "recordProp": { "record": false },
                    "voiceProp": { "voiceConf": "70000" },
                    "usersProp": { "maxUsers": 0 },
                    "metadataProp": { "metadata": {} },
                },
            },
        },
    })
}

#[must_use]
pub fn meeting_ended_raw(internal: &str) -> Value {
    json!({
        "envelope": { "name": "MeetingDestroyedEvtMsg", "routing": {} },
        "core": {
            "header": { "name": "MeetingDestroyedEvtMsg" },
            "body": { "meetingId": internal },
        },
    })
}

#[must_use]
pub fn user_joined_raw(meeting: &str, user: &str, name: &str) -> Value {
    json!({
        "envelope": { "name": "UserJoinedMeetingEvtMsg", "routing": { "meetingId": meeting } },
        "core": {
            "header": { "name": "UserJoinedMeetingEvtMsg", "userId": user },
            "body": {
                "extId": format!("ext-{user}"),
                "name": name,
                "role": "VIEWER",
                "presenter": false,
                "guest": false,
            },
        },
    })
}

#[must_use]
pub fn user_left_raw(meeting: &str, user: &str) -> Value {
    json!({
        "envelope": { "name": "UserLeftMeetingEvtMsg", "routing": { "meetingId": meeting } },
        "core": {
            "header": { "name": "UserLeftMeetingEvtMsg", "userId": user },
            "body": {},
        },
    })
}

#[must_use]
pub fn presenter_assigned_raw(meeting: &str, user: &str) -> Value {
    json!({
        "envelope": { "name": "PresenterAssignedEvtMsg", "routing": { "meetingId": meeting } },
        "core": {
            "header": { "name": "PresenterAssignedEvtMsg", "userId": user },
            "body": { "presenterId": user },
        },
    })
}

#[must_use]
pub fn emoji_changed_raw(meeting: &str, user: &str, emoji: &str) -> Value {
    json!({
        "envelope": { "name": "UserEmojiChangedEvtMsg", "routing": { "meetingId": meeting } },
        "core": {
            "header": { "name": "UserEmojiChangedEvtMsg", "userId": user },
            "body": { "emoji": emoji },
        },
    })
}

#[must_use]
pub fn chat_message_raw(meeting: &str, sender: &str, message: &str) -> Value {
    json!({
        "envelope": {
            "name": "GroupChatMessageBroadcastEvtMsg",
            "routing": { "meetingId": meeting },
        },
        "core": {
            "header": { "name": "GroupChatMessageBroadcastEvtMsg", "userId": sender },
            "body": {
                "chatId": "MAIN-PUBLIC-GROUP-CHAT",
                "msg": {
                    "id": format!("msg-{}", Uuid::new_v4()),
                    "message": message,
                    "timestamp": 1_700_000_000_000_i64,
                    "sender": { "id": sender, "name": sender },
                },
            },
        },
    })
}

#[must_use]
pub fn rap_published_raw(record_id: &str) -> Value {
    json!({
        "envelope": { "name": "PublishedRecordingSysMsg", "routing": {} },
        "core": {
            "header": { "name": "PublishedRecordingSysMsg" },
            "body": { "recordId": record_id, "internalMeetingId": record_id },
        },
    })
}

/// Recording pipeline step message (`header`/`payload` wire shape).
#[must_use]
pub fn comp_rap_step_raw(step: &str, meeting_id: &str, external: &str) -> Value {
    json!({
        "header": {
            "name": step,
            "current_time": chrono::Utc::now().timestamp_millis(),
            "version": "0.1",
        },
        "payload": {
            "meeting_id": meeting_id,
            "external_meeting_id": external,
            "success": true,
            "step_time": 1234,
        },
    })
}

#[must_use]
pub fn poll_started_raw(meeting: &str, user: &str, poll_id: &str) -> Value {
    json!({
        "envelope": { "name": "PollStartedEvtMsg", "routing": { "meetingId": meeting } },
        "core": {
            "header": { "name": "PollStartedEvtMsg", "userId": user },
            "body": {
                "pollId": poll_id,
                "question": "Ready?",
                "poll": { "answers": [{ "id": 0, "key": "Yes" }, { "id": 1, "key": "No" }] },
            },
        },
    })
}
