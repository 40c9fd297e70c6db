//! Webhooks service configuration.
//!
//! Everything comes from environment variables; secrets never show up
//! in `Debug` output.

use common::checksum::ChecksumAlgorithm;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address (hook administration API, health, metrics).
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3005";

/// Default storage backend.
pub const DEFAULT_STORAGE_BACKEND: &str = "redis";

/// Default input source.
pub const DEFAULT_INPUT_SOURCE: &str = "redis";

/// Default key namespace for persisted state.
pub const DEFAULT_KEY_NAMESPACE: &str = "bbb-webhooks";

/// Default outbound checksum algorithm.
pub const DEFAULT_CHECKSUM_ALGORITHM: ChecksumAlgorithm = ChecksumAlgorithm::Sha1;

/// Default per-attempt callback request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Default retry backoff schedule in milliseconds.
pub const DEFAULT_RETRY_INTERVALS_MS: [u64; 5] = [1_000, 2_000, 5_000, 10_000, 30_000];

/// Default re-arm delay for permanent hooks once the schedule is exhausted,
/// in milliseconds.
pub const DEFAULT_PERMANENT_INTERVAL_RESET_MS: u64 = 8_000;

/// Default meeting-mapping inactivity timeout in milliseconds (one week).
pub const DEFAULT_MAPPING_TIMEOUT_MS: u64 = 604_800_000;

/// Default interval between mapping cleanup sweeps in milliseconds.
pub const DEFAULT_MAPPING_CLEANUP_INTERVAL_MS: u64 = 10_000;

/// Default pub/sub channels to subscribe to.
pub const DEFAULT_INBOUND_CHANNELS: [&str; 5] = [
    "from-akka-apps-redis-channel",
    "from-bbb-web-redis-channel",
    "from-akka-apps-chat-redis-channel",
    "from-akka-apps-pres-redis-channel",
    "bigbluebutton:from-rap",
];

/// Persistence backends the service can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Redis hashes and sets (production).
    Redis,
    /// In-process store with no durability (tests, single-node dev).
    Memory,
}

/// Input sources the service can consume raw events from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// Redis pub/sub subscription.
    Redis,
}

/// Webhooks service configuration.
///
/// Built from environment variables. Shared secret, server domain, and
/// (when Redis is in use) the Redis URL are required; everything else has
/// a default. Secret fields render as `[REDACTED]`.
#[derive(Clone)]
pub struct Config {
    /// Storage backend for hooks and correlation mappings.
    pub storage_backend: StorageBackend,

    /// Input source for raw events.
    pub input_source: InputSource,

    /// Redis connection URL (storage and pub/sub input). Wrapped in
    /// `SecretString` since the URL can embed a password.
    /// Required when either the storage backend or the input source is Redis.
    pub redis_url: SecretString,

    /// HTTP bind address for the hook administration API (default: "0.0.0.0:3005").
    pub bind_address: String,

    /// Namespace prefixing every persisted key (default: "bbb-webhooks").
    pub key_namespace: String,

    /// Domain reported to receivers in callback POST bodies.
    pub server_domain: String,

    /// Shared secret for API checksums and callback signing. Wrapped
    /// in `SecretString` so it stays out of the logs.
    pub shared_secret: SecretString,

    /// When true, callbacks carry `Authorization: Bearer <secret>` instead of
    /// a checksum query parameter.
    pub bearer_auth: bool,

    /// Digest algorithm for outbound callback checksums (default: sha1).
    pub checksum_algorithm: ChecksumAlgorithm,

    /// When true, hooks registered with `getRaw` also receive unprocessed
    /// events.
    pub raw_delivery_enabled: bool,

    /// Callback URLs registered as permanent hooks at startup.
    pub permanent_urls: Vec<String>,

    /// Whether permanent hooks receive raw events.
    pub permanent_get_raw: bool,

    /// Per-attempt callback request timeout.
    pub request_timeout: Duration,

    /// Retry backoff schedule applied after a failed callback attempt.
    pub retry_intervals: Vec<Duration>,

    /// Delay before a permanent hook retries again once the schedule is
    /// exhausted.
    pub permanent_interval_reset: Duration,

    /// Optional cap on concurrent deliveries per hook. `None` means
    /// unlimited.
    pub hook_max_in_flight: Option<usize>,

    /// Meeting mappings idle longer than this are expired.
    pub mapping_timeout: Duration,

    /// Interval between mapping cleanup sweeps.
    pub mapping_cleanup_interval: Duration,

    /// Pub/sub channels to subscribe to for raw events.
    pub inbound_channels: Vec<String>,
}

/// Hand-written so the secret fields never leak through `{:?}`.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("storage_backend", &self.storage_backend)
            .field("input_source", &self.input_source)
            .field("redis_url", &"[REDACTED]")
            .field("bind_address", &self.bind_address)
            .field("key_namespace", &self.key_namespace)
            .field("server_domain", &self.server_domain)
            .field("shared_secret", &"[REDACTED]")
            .field("bearer_auth", &self.bearer_auth)
            .field("checksum_algorithm", &self.checksum_algorithm)
            .field("raw_delivery_enabled", &self.raw_delivery_enabled)
            .field("permanent_urls", &self.permanent_urls)
            .field("permanent_get_raw", &self.permanent_get_raw)
            .field("request_timeout", &self.request_timeout)
            .field("retry_intervals", &self.retry_intervals)
            .field("permanent_interval_reset", &self.permanent_interval_reset)
            .field("hook_max_in_flight", &self.hook_max_in_flight)
            .field("mapping_timeout", &self.mapping_timeout)
            .field("mapping_cleanup_interval", &self.mapping_cleanup_interval)
            .field("inbound_channels", &self.inbound_channels)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Read configuration from an explicit variable map. Tests use this
    /// to avoid touching the process environment.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let storage_backend = match vars
            .get("WH_STORAGE_BACKEND")
            .map_or(DEFAULT_STORAGE_BACKEND, String::as_str)
        {
            "redis" => StorageBackend::Redis,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "WH_STORAGE_BACKEND: unknown backend '{other}'"
                )))
            }
        };

        let input_source = match vars
            .get("WH_INPUT_SOURCE")
            .map_or(DEFAULT_INPUT_SOURCE, String::as_str)
        {
            "redis" => InputSource::Redis,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "WH_INPUT_SOURCE: unknown source '{other}'"
                )))
            }
        };

        // Redis is both the default store and the only input transport, so
        // the URL is required unless everything runs in memory.
        let needs_redis =
            storage_backend == StorageBackend::Redis || input_source == InputSource::Redis;
        let redis_url = match vars.get("REDIS_URL") {
            Some(url) => SecretString::from(url.clone()),
            None if needs_redis => {
                return Err(ConfigError::MissingEnvVar("REDIS_URL".to_string()))
            }
            None => SecretString::from(String::new()),
        };

        let shared_secret = SecretString::from(
            vars.get("WH_SHARED_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("WH_SHARED_SECRET".to_string()))?
                .clone(),
        );

        let server_domain = vars
            .get("WH_SERVER_DOMAIN")
            .ok_or_else(|| ConfigError::MissingEnvVar("WH_SERVER_DOMAIN".to_string()))?
            .clone();

        let bind_address = vars
            .get("WH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let key_namespace = vars
            .get("WH_KEY_NAMESPACE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_KEY_NAMESPACE.to_string());

        let bearer_auth = parse_var(vars, "WH_BEARER_AUTH", false)?;

        let checksum_algorithm = match vars.get("WH_CHECKSUM_ALGORITHM") {
            Some(name) => name
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("WH_CHECKSUM_ALGORITHM: {e}")))?,
            None => DEFAULT_CHECKSUM_ALGORITHM,
        };

        let raw_delivery_enabled = parse_var(vars, "WH_GET_RAW", false)?;

        let permanent_urls = vars
            .get("WH_PERMANENT_URLS")
            .map(|s| split_list(s))
            .unwrap_or_default();

        let permanent_get_raw = parse_var(vars, "WH_PERMANENT_GET_RAW", false)?;

        let request_timeout = Duration::from_millis(parse_var(
            vars,
            "WH_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
        )?);

        let retry_intervals = match vars.get("WH_RETRY_INTERVALS_MS") {
            Some(s) => parse_interval_list(s)
                .map_err(|e| ConfigError::InvalidValue(format!("WH_RETRY_INTERVALS_MS: {e}")))?,
            None => DEFAULT_RETRY_INTERVALS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        };

        let permanent_interval_reset = Duration::from_millis(parse_var(
            vars,
            "WH_PERMANENT_INTERVAL_RESET_MS",
            DEFAULT_PERMANENT_INTERVAL_RESET_MS,
        )?);

        let hook_max_in_flight = match vars.get("WH_HOOK_MAX_IN_FLIGHT") {
            Some(s) => {
                let cap: usize = s.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("WH_HOOK_MAX_IN_FLIGHT: '{s}'"))
                })?;
                if cap == 0 {
                    return Err(ConfigError::InvalidValue(
                        "WH_HOOK_MAX_IN_FLIGHT: must be at least 1".to_string(),
                    ));
                }
                Some(cap)
            }
            None => None,
        };

        let mapping_timeout = Duration::from_millis(parse_var(
            vars,
            "WH_MAPPING_TIMEOUT_MS",
            DEFAULT_MAPPING_TIMEOUT_MS,
        )?);

        let mapping_cleanup_interval = Duration::from_millis(parse_var(
            vars,
            "WH_MAPPING_CLEANUP_INTERVAL_MS",
            DEFAULT_MAPPING_CLEANUP_INTERVAL_MS,
        )?);

        let inbound_channels = vars
            .get("WH_INBOUND_CHANNELS")
            .map(|s| split_list(s))
            .unwrap_or_else(|| {
                DEFAULT_INBOUND_CHANNELS
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            });
        if inbound_channels.is_empty() {
            return Err(ConfigError::InvalidValue(
                "WH_INBOUND_CHANNELS: at least one channel is required".to_string(),
            ));
        }

        Ok(Config {
            storage_backend,
            input_source,
            redis_url,
            bind_address,
            key_namespace,
            server_domain,
            shared_secret,
            bearer_auth,
            checksum_algorithm,
            raw_delivery_enabled,
            permanent_urls,
            permanent_get_raw,
            request_timeout,
            retry_intervals,
            permanent_interval_reset,
            hook_max_in_flight,
            mapping_timeout,
            mapping_cleanup_interval,
            inbound_channels,
        })
    }
}

/// Parse an optional variable, failing on present-but-invalid values.
fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(s) => s
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}: '{s}'"))),
        None => Ok(default),
    }
}

/// Split a comma-separated list, dropping empty entries.
fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Parse a comma-separated list of millisecond durations.
fn parse_interval_list(s: &str) -> Result<Vec<Duration>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| format!("malformed interval '{entry}'"))
        })
        .collect()
}
