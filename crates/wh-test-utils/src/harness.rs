//! Test harnesses for E2E testing.
//!
//! `TestWhServer` spawns the real API router on an ephemeral port;
//! `TestPipeline` wires the full event pipeline (processor, registries,
//! dispatcher) over in-memory storage so tests can feed raw messages and
//! observe callback deliveries.

use common::checksum::{api_checksum, ChecksumAlgorithm};
use common::secret::SecretString;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wh_service::api::{self, AppState};
use wh_service::delivery::{CallbackAuth, DeliverySettings, WebHooksDispatcher};
use wh_service::events::EventNormalizer;
use wh_service::processor::{EventProcessor, OutputConsumer};
use wh_service::repositories::{
    HookRepository, IdMappingRepository, SubscriptionOutcome, SubscriptionParams,
    UserMappingRepository,
};
use wh_service::storage::{KeyValueStore, MemoryStore};

/// Shared secret every harness-spawned server validates checksums against.
pub const TEST_SECRET: &str = "test-secret";

/// Test harness for spawning the webhooks API server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_ping() -> anyhow::Result<()> {
///     let server = TestWhServer::spawn().await?;
///     let body = reqwest::get(format!("{}/bigbluebutton/api/hooks/ping", server.url()))
///         .await?
///         .text()
///         .await?;
///     assert_eq!(body, "bbb-webhooks up!");
///     Ok(())
/// }
/// ```
pub struct TestWhServer {
    addr: SocketAddr,
    hooks: Arc<HookRepository>,
    _handle: JoinHandle<()>,
}

impl TestWhServer {
    /// Spawn a test server with no configured permanent URLs.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind an ephemeral port.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_permanent(Vec::new()).await
    }

    /// Spawn a test server that treats `permanent_urls` as permanent hook
    /// registrations.
    ///
    /// The server:
    /// - Binds to a random available port (127.0.0.1:0)
    /// - Uses in-memory storage
    /// - Validates checksums against [`TEST_SECRET`]
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind an ephemeral port.
    pub async fn spawn_with_permanent(permanent_urls: Vec<String>) -> Result<Self, anyhow::Error> {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let hooks = Arc::new(HookRepository::new(Arc::clone(&store), "test"));

        let state = Arc::new(AppState {
            hooks: Arc::clone(&hooks),
            store,
            shared_secret: SecretString::from(TEST_SECRET),
            permanent_urls,
            key_namespace: "test".to_string(),
        });

        // A recorder handle that is not installed globally; /metrics renders
        // an empty exposition, which is all the harness needs
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = api::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {e}"))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {e}"))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {e}");
            }
        });

        Ok(Self {
            addr,
            hooks,
            _handle: handle,
        })
    }

    /// Base URL of the test server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// The socket address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The hook registry behind the server.
    #[must_use]
    pub fn hooks(&self) -> Arc<HookRepository> {
        Arc::clone(&self.hooks)
    }

    /// Full URL for a guarded API call, with a valid checksum appended.
    ///
    /// `method` is the path after `/bigbluebutton/api/` (e.g.
    /// `hooks/create`); `query` is the raw query string without the
    /// checksum parameter.
    #[must_use]
    pub fn api_url(&self, method: &str, query: &str) -> String {
        let checksum = api_checksum(ChecksumAlgorithm::Sha1, method, query, TEST_SECRET);
        if query.is_empty() {
            format!("{}/bigbluebutton/api/{method}?checksum={checksum}", self.url())
        } else {
            format!(
                "{}/bigbluebutton/api/{method}?{query}&checksum={checksum}",
                self.url()
            )
        }
    }
}

impl Drop for TestWhServer {
    fn drop(&mut self) {
        // Abort the HTTP server task for immediate cleanup
        self._handle.abort();
    }
}

/// Full event pipeline over in-memory storage: processor, registries, and a
/// dispatcher delivering real HTTP callbacks.
pub struct TestPipeline {
    pub processor: Arc<EventProcessor>,
    pub hooks: Arc<HookRepository>,
    pub id_mappings: Arc<IdMappingRepository>,
    pub user_mappings: Arc<UserMappingRepository>,
    cancel: CancellationToken,
}

impl TestPipeline {
    /// Build a pipeline with the given delivery settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher's HTTP client cannot be built.
    pub fn build(settings: DeliverySettings) -> Result<Self, anyhow::Error> {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let hooks = Arc::new(HookRepository::new(Arc::clone(&store), "test"));
        let id_mappings = Arc::new(IdMappingRepository::new(Arc::clone(&store), "test"));
        let user_mappings = Arc::new(UserMappingRepository::new(store, "test"));

        let cancel = CancellationToken::new();
        let dispatcher = WebHooksDispatcher::new(
            Arc::clone(&hooks),
            Arc::clone(&id_mappings),
            settings,
            cancel.child_token(),
        )
        .map_err(|e| anyhow::anyhow!("Failed to build dispatcher: {e}"))?;

        let outputs: Vec<Arc<dyn OutputConsumer>> = vec![Arc::new(dispatcher)];
        let normalizer = EventNormalizer::new(Arc::clone(&id_mappings), Arc::clone(&user_mappings));
        let processor = Arc::new(EventProcessor::new(
            normalizer,
            Arc::clone(&id_mappings),
            Arc::clone(&user_mappings),
            outputs,
        ));

        Ok(Self {
            processor,
            hooks,
            id_mappings,
            user_mappings,
            cancel,
        })
    }

    /// Delivery settings tuned for tests: checksum auth against
    /// [`TEST_SECRET`], a short retry schedule, and raw delivery enabled.
    #[must_use]
    pub fn settings(domain: &str) -> DeliverySettings {
        DeliverySettings {
            domain: domain.to_string(),
            auth: CallbackAuth::Checksum {
                algorithm: ChecksumAlgorithm::Sha1,
                secret: SecretString::from(TEST_SECRET),
            },
            retry_intervals: vec![Duration::from_millis(50), Duration::from_millis(50)],
            permanent_interval_reset: Duration::from_millis(100),
            request_timeout: Duration::from_secs(2),
            raw_delivery_enabled: true,
            hook_max_in_flight: None,
        }
    }

    /// Register a hook, panicking on storage errors to fail the test.
    ///
    /// # Panics
    ///
    /// Panics if the registration fails.
    pub async fn register_hook(
        &self,
        callback_url: &str,
        meeting_id: Option<&str>,
        event_ids: Option<&str>,
        get_raw: bool,
    ) -> SubscriptionOutcome {
        self.hooks
            .add_subscription(SubscriptionParams {
                callback_url: callback_url.to_string(),
                meeting_id: meeting_id.map(ToString::to_string),
                event_ids: event_ids.map(ToString::to_string),
                permanent: false,
                get_raw,
            })
            .await
            .expect("hook registration should succeed")
    }

    /// Cancel in-flight deliveries.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
