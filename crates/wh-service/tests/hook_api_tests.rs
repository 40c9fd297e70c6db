//! Integration tests for the hook administration API.
//!
//! Tests the full HTTP surface through a real server on an ephemeral port:
//! - Checksum guard acceptance and rejection
//! - Hook create/list/destroy lifecycle and XML envelopes
//! - Permanent hook behavior
//! - Meeting-scoped listing

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use wh_test_utils::TestWhServer;

/// Extract the text content of the first `<name>` element.
fn tag(body: &str, name: &str) -> Option<String> {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let start = body.find(&open)? + open.len();
    let end = body.get(start..)?.find(&close)? + start;
    Some(body.get(start..end)?.to_string())
}

#[tokio::test]
async fn test_ping_responds_without_checksum() -> Result<()> {
    let server = TestWhServer::spawn().await?;

    let response = reqwest::get(format!("{}/bigbluebutton/api/hooks/ping", server.url())).await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await?, "bbb-webhooks up!");
    Ok(())
}

#[tokio::test]
async fn test_health_and_ready_probes() -> Result<()> {
    let server = TestWhServer::spawn().await?;

    let health = reqwest::get(format!("{}/health", server.url())).await?;
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await?, "OK");

    let ready = reqwest::get(format!("{}/ready", server.url())).await?;
    assert_eq!(ready.status(), 200);
    Ok(())
}

#[tokio::test]
async fn test_guarded_route_rejects_missing_checksum() -> Result<()> {
    let server = TestWhServer::spawn().await?;

    let response = reqwest::get(format!(
        "{}/bigbluebutton/api/hooks/list",
        server.url()
    ))
    .await?;

    // API errors still answer 200 with an XML envelope
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/xml"
    );
    let body = response.text().await?;
    assert_eq!(tag(&body, "messageKey").unwrap(), "checksumError");
    assert_eq!(
        tag(&body, "message").unwrap(),
        "You did not pass the checksum security check."
    );
    Ok(())
}

#[tokio::test]
async fn test_create_list_destroy_lifecycle() -> Result<()> {
    let server = TestWhServer::spawn().await?;
    let client = reqwest::Client::new();

    // Create
    let created = client
        .get(server.api_url(
            "hooks/create",
            "callbackURL=https%3A%2F%2Fexample.com%2Fcb&meetingID=ext-1",
        ))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(tag(&created, "returncode").unwrap(), "SUCCESS");
    let hook_id = tag(&created, "hookID").unwrap();
    assert_eq!(tag(&created, "permanentHook").unwrap(), "false");

    // List
    let listing = client
        .get(server.api_url("hooks/list", ""))
        .send()
        .await?
        .text()
        .await?;
    assert!(listing.contains(&format!("<hookID>{hook_id}</hookID>")));
    assert!(listing.contains("<callbackURL><![CDATA[https://example.com/cb]]></callbackURL>"));
    assert!(listing.contains("<meetingID><![CDATA[ext-1]]></meetingID>"));

    // Destroy
    let destroyed = client
        .get(server.api_url("hooks/destroy", &format!("hookID={hook_id}")))
        .send()
        .await?
        .text()
        .await?;
    assert!(destroyed.contains("<removed>true</removed>"));

    // Destroying again reports the hook as missing
    let again = client
        .get(server.api_url("hooks/destroy", &format!("hookID={hook_id}")))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(tag(&again, "messageKey").unwrap(), "destroyMissingHook");

    assert_eq!(server.hooks().count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_create_deduplicates_on_callback_url() -> Result<()> {
    let server = TestWhServer::spawn().await?;
    let client = reqwest::Client::new();
    let url = server.api_url("hooks/create", "callbackURL=https%3A%2F%2Fexample.com%2Fcb");

    let first = client.get(&url).send().await?.text().await?;
    let second = client.get(&url).send().await?.text().await?;

    assert_eq!(tag(&second, "messageKey").unwrap(), "duplicateWarning");
    assert_eq!(tag(&first, "hookID"), tag(&second, "hookID"));
    assert_eq!(server.hooks().count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_parameters_report_message_keys() -> Result<()> {
    let server = TestWhServer::spawn().await?;
    let client = reqwest::Client::new();

    let body = client
        .get(server.api_url("hooks/create", ""))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(
        tag(&body, "messageKey").unwrap(),
        "missingParamCallbackURL"
    );

    let body = client
        .get(server.api_url("hooks/destroy", ""))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(tag(&body, "messageKey").unwrap(), "missingParamHookID");
    Ok(())
}

#[tokio::test]
async fn test_permanent_hook_cannot_be_destroyed_through_the_api() -> Result<()> {
    let server = TestWhServer::spawn_with_permanent(vec![
        "https://permanent.example.com/cb".to_string(),
    ])
    .await?;
    let client = reqwest::Client::new();

    let created = client
        .get(server.api_url(
            "hooks/create",
            "callbackURL=https%3A%2F%2Fpermanent.example.com%2Fcb",
        ))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(tag(&created, "permanentHook").unwrap(), "true");
    let hook_id = tag(&created, "hookID").unwrap();

    let destroyed = client
        .get(server.api_url("hooks/destroy", &format!("hookID={hook_id}")))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(tag(&destroyed, "messageKey").unwrap(), "destroyMissingHook");
    assert_eq!(server.hooks().count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_list_with_meeting_id_scopes_the_result() -> Result<()> {
    let server = TestWhServer::spawn().await?;
    let client = reqwest::Client::new();

    for query in [
        "callbackURL=https%3A%2F%2Fglobal.example.com%2Fcb",
        "callbackURL=https%3A%2F%2Fscoped.example.com%2Fcb&meetingID=ext-1",
        "callbackURL=https%3A%2F%2Fother.example.com%2Fcb&meetingID=ext-2",
    ] {
        client
            .get(server.api_url("hooks/create", query))
            .send()
            .await?
            .error_for_status()?;
    }

    let listing = client
        .get(server.api_url("hooks/list", "meetingID=ext-1"))
        .send()
        .await?
        .text()
        .await?;
    assert!(listing.contains("https://global.example.com/cb"));
    assert!(listing.contains("https://scoped.example.com/cb"));
    assert!(!listing.contains("https://other.example.com/cb"));
    Ok(())
}

#[tokio::test]
async fn test_event_filter_round_trips_through_the_listing() -> Result<()> {
    let server = TestWhServer::spawn().await?;
    let client = reqwest::Client::new();

    client
        .get(server.api_url(
            "hooks/create",
            "callbackURL=https%3A%2F%2Fexample.com%2Fcb&eventID=USER-JOINED,user-left",
        ))
        .send()
        .await?
        .error_for_status()?;

    let listing = client
        .get(server.api_url("hooks/list", ""))
        .send()
        .await?
        .text()
        .await?;
    // Filters are lowercased on storage and space-joined in the listing
    assert!(listing.contains("<eventID>user-joined user-left</eventID>"));
    Ok(())
}
