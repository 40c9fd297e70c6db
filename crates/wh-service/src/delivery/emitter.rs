//! Single-callback delivery state machine.
//!
//! One emitter delivers one message to one callback URL. It walks
//! `SCHEDULED -> DISPATCHING` until an attempt succeeds or the retry
//! schedule runs out; permanent hooks restart the schedule after a
//! configured pause instead of stopping. An emitter is consumed by
//! [`CallbackEmitter::run`] and reports exactly one terminal outcome.

use crate::delivery::DeliverySettings;
use crate::observability::metrics;
use common::checksum::{callback_checksum, ChecksumAlgorithm};
use common::secret::{ExposeSecret, SecretString};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How outbound callback requests prove their origin.
#[derive(Debug, Clone)]
pub enum CallbackAuth {
    /// Append `checksum=hash(callbackURL + JSON(body) + secret)` to the URL.
    Checksum {
        algorithm: ChecksumAlgorithm,
        secret: SecretString,
    },
    /// Send `Authorization: Bearer <token>` instead of a checksum.
    Bearer { token: SecretString },
}

/// Form fields POSTed to the callback URL.
///
/// Field order matters: the checksum covers the JSON rendering of this
/// struct, and receivers reconstruct that JSON with `event` first.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackBody {
    /// The message, JSON-encoded and array-wrapped.
    pub event: String,

    /// Epoch millis at the time the delivery was scheduled. Stable across
    /// retries of the same delivery.
    pub timestamp: i64,

    /// Identifies the sending server to the receiver.
    pub domain: String,
}

/// Terminal result of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint acknowledged the callback (2xx, or 401).
    Delivered { attempts: u32 },
    /// Retries were exhausted or the emitter was cancelled.
    Stopped { attempts: u32 },
}

/// Walks a fixed backoff schedule, one interval per failed attempt.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    intervals: Vec<Duration>,
    cursor: usize,
}

impl RetrySchedule {
    #[must_use]
    pub fn new(intervals: Vec<Duration>) -> Self {
        Self {
            intervals,
            cursor: 0,
        }
    }

    /// Delay before the next retry, or `None` once the schedule is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.intervals.get(self.cursor).copied();
        if delay.is_some() {
            self.cursor += 1;
        }
        delay
    }

    /// Restart the schedule from its first interval.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

enum EmitterState {
    Scheduled(Duration),
    Dispatching,
    Done(DeliveryOutcome),
}

/// Delivers one message to one callback URL with retries.
pub struct CallbackEmitter {
    client: Client,
    callback_url: String,
    body: CallbackBody,
    permanent: bool,
    auth: CallbackAuth,
    schedule: RetrySchedule,
    permanent_interval_reset: Duration,
}

impl CallbackEmitter {
    pub fn new(
        client: Client,
        callback_url: String,
        body: CallbackBody,
        permanent: bool,
        settings: &DeliverySettings,
    ) -> Self {
        Self {
            client,
            callback_url,
            body,
            permanent,
            auth: settings.auth.clone(),
            schedule: RetrySchedule::new(settings.retry_intervals.clone()),
            permanent_interval_reset: settings.permanent_interval_reset,
        }
    }

    /// Run the delivery to its terminal outcome. Cancellation interrupts
    /// pending backoff timers and reports `Stopped`.
    pub async fn run(mut self, cancel: CancellationToken) -> DeliveryOutcome {
        let mut attempts: u32 = 0;
        let mut state = EmitterState::Scheduled(Duration::ZERO);

        loop {
            match state {
                EmitterState::Scheduled(delay) => {
                    if !delay.is_zero() {
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = cancel.cancelled() => {
                                return DeliveryOutcome::Stopped { attempts };
                            }
                        }
                    }
                    if cancel.is_cancelled() {
                        return DeliveryOutcome::Stopped { attempts };
                    }
                    state = EmitterState::Dispatching;
                }
                EmitterState::Dispatching => {
                    attempts += 1;
                    state = if self.attempt(attempts).await {
                        EmitterState::Done(DeliveryOutcome::Delivered { attempts })
                    } else {
                        match self.schedule.next_delay() {
                            Some(delay) => {
                                warn!(
                                    target: "wh.delivery.emitter",
                                    callback_url = %self.callback_url,
                                    retry_in_ms = delay.as_millis() as u64,
                                    "Callback failed, retrying"
                                );
                                EmitterState::Scheduled(delay)
                            }
                            None if self.permanent => {
                                // Permanent hooks never give up; restart the
                                // schedule after the reset pause.
                                self.schedule.reset();
                                warn!(
                                    target: "wh.delivery.emitter",
                                    callback_url = %self.callback_url,
                                    "Retries exhausted for permanent hook, restarting schedule"
                                );
                                EmitterState::Scheduled(self.permanent_interval_reset)
                            }
                            None => EmitterState::Done(DeliveryOutcome::Stopped { attempts }),
                        }
                    };
                }
                EmitterState::Done(outcome) => return outcome,
            }
        }
    }

    /// One POST to the callback URL. 401 counts as delivered: the endpoint
    /// answered, it just refused us.
    async fn attempt(&self, attempt: u32) -> bool {
        let url = match self.target_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    target: "wh.delivery.emitter",
                    callback_url = %self.callback_url,
                    error = %e,
                    "Could not build callback URL"
                );
                metrics::record_callback_attempt(false);
                return false;
            }
        };

        let mut request = self.client.post(&url).form(&self.body);
        if let CallbackAuth::Bearer { token } = &self.auth {
            request = request.bearer_auth(token.expose_secret());
        }

        let delivered = match request.send().await {
            Ok(response) => {
                let status = response.status();
                let delivered = status.is_success() || status == StatusCode::UNAUTHORIZED;
                if delivered {
                    debug!(
                        target: "wh.delivery.emitter",
                        callback_url = %self.callback_url,
                        status = status.as_u16(),
                        attempt,
                        "Callback delivered"
                    );
                } else {
                    warn!(
                        target: "wh.delivery.emitter",
                        callback_url = %self.callback_url,
                        status = status.as_u16(),
                        attempt,
                        "Callback rejected"
                    );
                }
                delivered
            }
            Err(e) => {
                warn!(
                    target: "wh.delivery.emitter",
                    callback_url = %self.callback_url,
                    error = %e,
                    attempt,
                    "Callback request failed"
                );
                false
            }
        };

        metrics::record_callback_attempt(delivered);
        delivered
    }

    /// The URL to POST to, with the checksum appended unless bearer auth
    /// is in use.
    fn target_url(&self) -> Result<String, serde_json::Error> {
        match &self.auth {
            CallbackAuth::Bearer { .. } => Ok(self.callback_url.clone()),
            CallbackAuth::Checksum { algorithm, secret } => {
                let body_json = serde_json::to_string(&self.body)?;
                let checksum = callback_checksum(
                    *algorithm,
                    &self.callback_url,
                    &body_json,
                    secret.expose_secret(),
                );
                let separator = if self.callback_url.contains('?') { '&' } else { '?' };
                Ok(format!("{}{}checksum={}", self.callback_url, separator, checksum))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::checksum::verify_callback_checksum;

    fn settings(auth: CallbackAuth) -> DeliverySettings {
        DeliverySettings {
            domain: "bbb.example.com".to_string(),
            auth,
            retry_intervals: vec![Duration::from_millis(1), Duration::from_millis(2)],
            permanent_interval_reset: Duration::from_millis(5),
            request_timeout: Duration::from_secs(5),
            raw_delivery_enabled: false,
            hook_max_in_flight: None,
        }
    }

    fn body() -> CallbackBody {
        CallbackBody {
            event: r#"[{"data":{}}]"#.to_string(),
            timestamp: 1_700_000_000_000,
            domain: "bbb.example.com".to_string(),
        }
    }

    #[test]
    fn test_retry_schedule_walks_and_resets() {
        let mut schedule = RetrySchedule::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
        ]);
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(schedule.next_delay(), None);
        assert_eq!(schedule.next_delay(), None);

        schedule.reset();
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_body_json_field_order_is_stable() {
        // Receivers rebuild this exact JSON to verify the checksum
        let json = serde_json::to_string(&body()).unwrap();
        assert_eq!(
            json,
            r#"{"event":"[{\"data\":{}}]","timestamp":1700000000000,"domain":"bbb.example.com"}"#
        );
    }

    #[test]
    fn test_checksum_auth_appends_query_parameter() {
        let auth = CallbackAuth::Checksum {
            algorithm: ChecksumAlgorithm::Sha1,
            secret: SecretString::from("topsecret"),
        };
        let emitter = CallbackEmitter::new(
            Client::new(),
            "https://example.com/callback".to_string(),
            body(),
            false,
            &settings(auth),
        );

        let url = emitter.target_url().unwrap();
        let checksum = url.strip_prefix("https://example.com/callback?checksum=").unwrap();
        assert_eq!(checksum.len(), 40);

        let body_json = serde_json::to_string(&body()).unwrap();
        assert!(verify_callback_checksum(
            "https://example.com/callback",
            &body_json,
            "topsecret",
            checksum
        ));
    }

    #[test]
    fn test_checksum_respects_existing_query_string() {
        let auth = CallbackAuth::Checksum {
            algorithm: ChecksumAlgorithm::Sha256,
            secret: SecretString::from("topsecret"),
        };
        let emitter = CallbackEmitter::new(
            Client::new(),
            "https://example.com/callback?tag=1".to_string(),
            body(),
            false,
            &settings(auth),
        );

        let url = emitter.target_url().unwrap();
        assert!(url.starts_with("https://example.com/callback?tag=1&checksum="));
    }

    #[test]
    fn test_bearer_auth_leaves_url_untouched() {
        let auth = CallbackAuth::Bearer {
            token: SecretString::from("topsecret"),
        };
        let emitter = CallbackEmitter::new(
            Client::new(),
            "https://example.com/callback".to_string(),
            body(),
            false,
            &settings(auth),
        );
        assert_eq!(emitter.target_url().unwrap(), "https://example.com/callback");
    }

    #[tokio::test]
    async fn test_cancelled_emitter_stops_without_dispatching() {
        let auth = CallbackAuth::Bearer {
            token: SecretString::from("topsecret"),
        };
        // Port 9 is discard; nothing should ever be reached because the
        // token is already cancelled when run() starts.
        let emitter = CallbackEmitter::new(
            Client::new(),
            "http://127.0.0.1:9/callback".to_string(),
            body(),
            false,
            &settings(auth),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = emitter.run(cancel).await;
        assert_eq!(outcome, DeliveryOutcome::Stopped { attempts: 0 });
    }
}
