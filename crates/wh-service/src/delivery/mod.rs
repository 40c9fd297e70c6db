//! Outbound webhook delivery.
//!
//! The [`WebHooksDispatcher`] consumes processed events, selects the hooks
//! that should receive each one, and spawns a [`CallbackEmitter`] per
//! (event, hook) pair. Emitters run to completion independently; a hook
//! that exhausts its retries is deregistered unless it is permanent.

pub mod dispatcher;
pub mod emitter;

pub use dispatcher::WebHooksDispatcher;
pub use emitter::{CallbackAuth, CallbackBody, CallbackEmitter, DeliveryOutcome, RetrySchedule};

use crate::config::Config;
use std::time::Duration;

/// Settings shared by every emitter the dispatcher spawns.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Value of the `domain` form field on every callback.
    pub domain: String,

    /// How outbound requests authenticate themselves.
    pub auth: CallbackAuth,

    /// Backoff schedule between failed attempts.
    pub retry_intervals: Vec<Duration>,

    /// Pause before a permanent hook restarts its schedule.
    pub permanent_interval_reset: Duration,

    /// Per-attempt request timeout.
    pub request_timeout: Duration,

    /// Whether hooks registered with `getRaw` receive raw messages.
    pub raw_delivery_enabled: bool,

    /// Optional cap on concurrent deliveries per hook.
    pub hook_max_in_flight: Option<usize>,
}

impl DeliverySettings {
    pub fn from_config(config: &Config) -> Self {
        let auth = if config.bearer_auth {
            CallbackAuth::Bearer {
                token: config.shared_secret.clone(),
            }
        } else {
            CallbackAuth::Checksum {
                algorithm: config.checksum_algorithm,
                secret: config.shared_secret.clone(),
            }
        };
        Self {
            domain: config.server_domain.clone(),
            auth,
            retry_intervals: config.retry_intervals.clone(),
            permanent_interval_reset: config.permanent_interval_reset,
            request_timeout: config.request_timeout,
            raw_delivery_enabled: config.raw_delivery_enabled,
            hook_max_in_flight: config.hook_max_in_flight,
        }
    }
}
