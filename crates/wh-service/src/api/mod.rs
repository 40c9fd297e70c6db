//! Hook administration API.
//!
//! Serves the BigBlueButton-compatible XML endpoints under
//! `/bigbluebutton/api/hooks/` (create, destroy, list, ping) plus the
//! operational endpoints (`/health`, `/ready`, `/metrics`). Every API
//! response is HTTP 200 with an XML envelope; failures are reported through
//! `returncode` and a `messageKey`. The create/destroy/list routes sit
//! behind a shared-secret checksum guard; `ping` and the operational
//! endpoints are open.

pub mod responses;

use crate::observability::metrics;
use crate::repositories::{Hook, HookRepository, SubscriptionParams};
use crate::storage::KeyValueStore;
use axum::{
    extract::{Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use common::checksum::{checksum_param, verify_api_checksum};
use common::secret::{ExposeSecret, SecretString};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{instrument, warn};

/// Handler state: the hook registry plus what checksum validation needs.
#[derive(Clone)]
pub struct AppState {
    /// Hook registry backing the create/destroy/list endpoints.
    pub hooks: Arc<HookRepository>,

    /// Storage handle, probed by the readiness check.
    pub store: Arc<dyn KeyValueStore>,

    /// Shared secret the checksum guard verifies against.
    pub shared_secret: SecretString,

    /// Callback URLs that register as permanent hooks.
    pub permanent_urls: Vec<String>,

    /// Key namespace for persisted state, used by the readiness probe.
    pub key_namespace: String,
}

/// Assemble the admin API router.
///
/// - `/bigbluebutton/api/hooks/create|destroy|list` - checksum guarded
/// - `/bigbluebutton/api/hooks/ping` - open, for dial-tone checks
/// - `/health`, `/ready` - liveness and readiness probes
/// - `/metrics` - Prometheus metrics endpoint
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let guarded_routes = Router::new()
        .route("/bigbluebutton/api/hooks/create", get(create_hook))
        .route("/bigbluebutton/api/hooks/destroy", get(destroy_hook))
        .route("/bigbluebutton/api/hooks/list", get(list_hooks))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            validate_checksum,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/bigbluebutton/api/hooks/ping", get(ping))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    guarded_routes
        .merge(public_routes)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

/// Checksum guard for the administration endpoints.
///
/// The digest covers the API method name (the path after
/// `/bigbluebutton/api/`), the query string without its `checksum`
/// parameter, and the shared secret. Rejections use the standard
/// `checksumError` envelope and, like every other API response, are served
/// with HTTP 200.
#[instrument(skip_all, name = "wh.api.checksum")]
async fn validate_checksum(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = {
        let path = req.uri().path();
        path.strip_prefix("/bigbluebutton/api/")
            .unwrap_or(path)
            .to_string()
    };
    let raw_query = req.uri().query().unwrap_or("").to_string();

    let verified = checksum_param(&raw_query).is_some_and(|provided| {
        verify_api_checksum(
            &method,
            &raw_query,
            state.shared_secret.expose_secret(),
            provided,
        )
    });

    if !verified {
        warn!(
            target: "wh.api",
            method = %method,
            "Rejecting request that failed the checksum check"
        );
        return xml(responses::CHECKSUM_ERROR);
    }

    next.run(req).await
}

/// Record method, path, status, and latency for every response, including
/// framework-level rejections that never reach a handler.
async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    metrics::record_http_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    #[serde(rename = "callbackURL")]
    callback_url: Option<String>,
    #[serde(rename = "meetingID")]
    meeting_id: Option<String>,
    #[serde(rename = "eventID")]
    event_id: Option<String>,
    #[serde(rename = "getRaw")]
    get_raw: Option<String>,
}

/// `GET /bigbluebutton/api/hooks/create`
///
/// Registers a callback URL, optionally scoped to an external meeting id
/// and filtered to a comma-separated list of event kinds. Re-registering an
/// existing URL answers `duplicateWarning` with the original hook id.
#[instrument(skip_all, name = "wh.api.create")]
async fn create_hook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CreateParams>,
) -> Response {
    let Some(callback_url) = params.callback_url else {
        return xml(responses::MISSING_PARAM_CALLBACK_URL);
    };

    let get_raw = params
        .get_raw
        .as_deref()
        .is_some_and(|raw| raw.eq_ignore_ascii_case("true"));
    let permanent = state.permanent_urls.contains(&callback_url);

    let outcome = state
        .hooks
        .add_subscription(SubscriptionParams {
            callback_url,
            meeting_id: params.meeting_id,
            event_ids: params.event_id,
            permanent,
            get_raw,
        })
        .await;

    match outcome {
        Ok(outcome) if outcome.duplicated => xml(responses::create_duplicated(&outcome.hook.id)),
        Ok(outcome) => xml(responses::create_success(
            &outcome.hook.id,
            outcome.hook.payload.permanent,
            outcome.hook.payload.get_raw,
        )),
        Err(error) => {
            warn!(target: "wh.api", %error, "Hook creation failed");
            xml(responses::CREATE_FAILURE)
        }
    }
}

#[derive(Debug, Deserialize)]
struct DestroyParams {
    #[serde(rename = "hookID")]
    hook_id: Option<String>,
}

/// `GET /bigbluebutton/api/hooks/destroy`
///
/// Removes a hook by id. Unknown ids and permanent hooks both answer
/// `destroyMissingHook`.
#[instrument(skip_all, name = "wh.api.destroy")]
async fn destroy_hook(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DestroyParams>,
) -> Response {
    let Some(hook_id) = params.hook_id else {
        return xml(responses::MISSING_PARAM_HOOK_ID);
    };

    match state.hooks.remove_subscription(&hook_id).await {
        Ok(true) => xml(responses::DESTROY_SUCCESS),
        Ok(false) => xml(responses::DESTROY_NO_HOOK),
        Err(error) => {
            warn!(target: "wh.api", %error, hook_id = %hook_id, "Hook removal failed");
            xml(responses::DESTROY_FAILURE)
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(rename = "meetingID")]
    meeting_id: Option<String>,
}

/// `GET /bigbluebutton/api/hooks/list`
///
/// With a `meetingID`, lists the global hooks plus the hooks scoped to that
/// meeting; without one, lists everything.
#[instrument(skip_all, name = "wh.api.list")]
async fn list_hooks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let hooks: Vec<Hook> = match params.meeting_id {
        Some(meeting_id) => {
            let mut hooks = state.hooks.all_global();
            hooks.extend(state.hooks.find_by_external_meeting_id(&meeting_id));
            hooks.sort_by(|a, b| a.id.cmp(&b.id));
            hooks
        }
        None => state.hooks.all(),
    };

    xml(responses::list_success(&hooks))
}

/// Dial-tone endpoint, open so monitoring does not need the secret.
async fn ping() -> &'static str {
    "bbb-webhooks up!"
}

/// Liveness probe.
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe. Ready means the storage backend answers.
async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let key = format!("{}:hooks", state.key_namespace);
    match state.store.set_members(&key).await {
        Ok(_) => (StatusCode::OK, "ready"),
        Err(error) => {
            warn!(target: "wh.api", %error, "Readiness probe failed against storage");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}

/// Prometheus metrics endpoint.
async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}

/// Wrap an XML envelope with the content type API consumers expect.
fn xml<B: IntoResponse>(body: B) -> Response {
    ([(CONTENT_TYPE, "text/xml")], body).into_response()
}
