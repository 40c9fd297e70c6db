//! XML response envelopes for the hook administration API.
//!
//! Every endpoint answers HTTP 200 with a `<response>` envelope; outcomes
//! are signalled through `returncode` and a stable `messageKey` per error
//! class, matching what API consumers already parse.

use crate::repositories::Hook;
use std::fmt::Write;

pub const CHECKSUM_ERROR: &str = "<response><returncode>FAILED</returncode><messageKey>checksumError</messageKey><message>You did not pass the checksum security check.</message></response>";

pub const CREATE_FAILURE: &str = "<response><returncode>FAILED</returncode><messageKey>createHookError</messageKey><message>An error happened while creating your hook. Check the logs.</message></response>";

pub const DESTROY_SUCCESS: &str =
    "<response><returncode>SUCCESS</returncode><removed>true</removed></response>";

pub const DESTROY_FAILURE: &str = "<response><returncode>FAILED</returncode><messageKey>destroyHookError</messageKey><message>An error happened while removing your hook. Check the logs.</message></response>";

pub const DESTROY_NO_HOOK: &str = "<response><returncode>FAILED</returncode><messageKey>destroyMissingHook</messageKey><message>The hook informed was not found.</message></response>";

pub const MISSING_PARAM_CALLBACK_URL: &str = "<response><returncode>FAILED</returncode><messageKey>missingParamCallbackURL</messageKey><message>You must specify a callbackURL in the parameters.</message></response>";

pub const MISSING_PARAM_HOOK_ID: &str = "<response><returncode>FAILED</returncode><messageKey>missingParamHookID</messageKey><message>You must specify a hookID in the parameters.</message></response>";

#[must_use]
pub fn create_success(id: &str, permanent: bool, get_raw: bool) -> String {
    format!(
        "<response><returncode>SUCCESS</returncode><hookID>{id}</hookID>\
         <permanentHook>{permanent}</permanentHook><rawData>{get_raw}</rawData></response>"
    )
}

#[must_use]
pub fn create_duplicated(id: &str) -> String {
    format!(
        "<response><returncode>SUCCESS</returncode><hookID>{id}</hookID>\
         <messageKey>duplicateWarning</messageKey>\
         <message>There is already a hook for this callback URL.</message></response>"
    )
}

/// Render the hook list. URLs and external meeting ids are caller-supplied
/// strings, so they ride in CDATA sections.
#[must_use]
pub fn list_success(hooks: &[Hook]) -> String {
    let mut body = String::from("<response><returncode>SUCCESS</returncode><hooks>");
    for hook in hooks {
        body.push_str("<hook>");
        let _ = write!(body, "<hookID>{}</hookID>", hook.id);
        let _ = write!(
            body,
            "<callbackURL><![CDATA[{}]]></callbackURL>",
            hook.payload.callback_url
        );
        if let Some(external) = &hook.payload.external_meeting_id {
            let _ = write!(body, "<meetingID><![CDATA[{external}]]></meetingID>");
        }
        if let Some(event_ids) = &hook.payload.event_ids {
            let _ = write!(body, "<eventID>{}</eventID>", event_ids.join(" "));
        }
        let _ = write!(body, "<permanentHook>{}</permanentHook>", hook.payload.permanent);
        let _ = write!(body, "<rawData>{}</rawData>", hook.payload.get_raw);
        body.push_str("</hook>");
    }
    body.push_str("</hooks></response>");
    body
}
