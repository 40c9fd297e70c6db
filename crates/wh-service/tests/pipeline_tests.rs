//! Input-to-callback pipeline tests: payloads enter as the JSON text an
//! inbound source would hand over and are observed as callback POSTs.
//!
//! Covers:
//! - Unparseable and unrecognized input is dropped without side effects
//! - Already-canonical payloads pass through unchanged
//! - Recording pipeline (comp-rap) and chat normalization reach consumers
//! - Meeting teardown synthesizes user-left events for tracked users

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use std::time::Duration;
use wh_test_utils::{fixtures, TestPipeline};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

async fn wait_for_requests(server: &MockServer, count: usize) -> Vec<Request> {
    for _ in 0..200 {
        let requests = server.received_requests().await.unwrap_or_default();
        if requests.len() >= count {
            return requests;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(
        requests.len() >= count,
        "expected {count} requests, mock server saw {}",
        requests.len()
    );
    requests
}

fn body_str(request: &Request) -> String {
    String::from_utf8_lossy(&request.body).into_owned()
}

async fn receiver() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cb"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_unusable_input_is_dropped_without_deliveries() -> Result<()> {
    let pipeline = TestPipeline::build(TestPipeline::settings("bbb.example.com"))?;
    let server = receiver().await;
    pipeline
        .register_hook(&format!("{}/cb", server.uri()), None, None, false)
        .await;

    // Not JSON, then JSON with no recognizable message name
    pipeline.processor.process_input_event("not json at all").await;
    pipeline
        .processor
        .process_input_event(r#"{"something": "else"}"#)
        .await;
    // A valid message still goes through afterwards
    pipeline
        .processor
        .process_input_event(&fixtures::meeting_created_raw("int-1", "ext-1").to_string())
        .await;

    let requests = wait_for_requests(&server, 1).await;
    assert!(body_str(requests.first().unwrap()).contains("meeting-created"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 1);

    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_canonical_payload_passes_through() -> Result<()> {
    let pipeline = TestPipeline::build(TestPipeline::settings("bbb.example.com"))?;
    let server = receiver().await;
    // Filtered hook: passthrough events keep their kind, so the filter matches
    pipeline
        .register_hook(
            &format!("{}/cb", server.uri()),
            None,
            Some("user-joined"),
            false,
        )
        .await;

    let canonical = serde_json::json!({
        "data": {
            "type": "event",
            "id": "user-joined",
            "attributes": {
                "meeting": { "internal-meeting-id": "int-1" },
                "user": { "internal-user-id": "user-1", "marker": "repost" },
            },
            "event": { "ts": 1_700_000_000_000_i64 },
        }
    });
    pipeline
        .processor
        .process_input_event(&canonical.to_string())
        .await;

    let requests = wait_for_requests(&server, 1).await;
    let body = body_str(requests.first().unwrap());
    assert!(body.contains("user-joined"));
    // Attributes survive untouched
    assert!(body.contains("repost"));

    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_recording_pipeline_steps_reach_consumers() -> Result<()> {
    let pipeline = TestPipeline::build(TestPipeline::settings("bbb.example.com"))?;
    let server = receiver().await;
    pipeline
        .register_hook(&format!("{}/cb", server.uri()), None, None, false)
        .await;

    pipeline
        .processor
        .process_raw_value(fixtures::comp_rap_step_raw("archive_started", "int-1", "ext-1"))
        .await;
    pipeline
        .processor
        .process_raw_value(fixtures::rap_published_raw("record-1"))
        .await;

    let requests = wait_for_requests(&server, 2).await;
    let bodies: Vec<String> = requests.iter().map(body_str).collect();
    assert!(bodies.iter().any(|b| b.contains("rap-archive-started")));
    assert!(bodies.iter().any(|b| b.contains("rap-published")));

    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_chat_messages_are_normalized() -> Result<()> {
    let pipeline = TestPipeline::build(TestPipeline::settings("bbb.example.com"))?;
    let server = receiver().await;
    pipeline
        .register_hook(&format!("{}/cb", server.uri()), None, None, false)
        .await;

    pipeline
        .processor
        .process_raw_value(fixtures::chat_message_raw("int-1", "user-1", "hello there"))
        .await;

    let requests = wait_for_requests(&server, 1).await;
    let body = body_str(requests.first().unwrap());
    assert!(body.contains("chat-group-message-sent"));
    assert!(body.contains("hello"));

    pipeline.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_meeting_teardown_synthesizes_user_left_events() -> Result<()> {
    let pipeline = TestPipeline::build(TestPipeline::settings("bbb.example.com"))?;
    let server = receiver().await;
    pipeline
        .register_hook(&format!("{}/cb", server.uri()), None, None, false)
        .await;

    pipeline
        .processor
        .process_raw_value(fixtures::meeting_created_raw("int-1", "ext-1"))
        .await;
    pipeline
        .processor
        .process_raw_value(fixtures::user_joined_raw("int-1", "user-1", "Ann"))
        .await;
    pipeline
        .processor
        .process_raw_value(fixtures::meeting_ended_raw("int-1"))
        .await;

    // created + joined + synthesized left + ended
    let requests = wait_for_requests(&server, 4).await;
    let bodies: Vec<String> = requests.iter().map(body_str).collect();
    for kind in ["meeting-created", "user-joined", "user-left", "meeting-ended"] {
        assert_eq!(
            bodies.iter().filter(|b| b.contains(kind)).count(),
            1,
            "expected exactly one {kind} callback"
        );
    }

    // Registries are cleared once the meeting is gone
    assert!(pipeline.id_mappings.external_meeting_id("int-1").is_none());
    assert!(pipeline.user_mappings.users_for_meeting("int-1").is_empty());

    pipeline.shutdown();
    Ok(())
}
